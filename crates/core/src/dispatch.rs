//! HSM dispatch rules: client field maps, primary/fallback template
//! selection, and slot resolution.
//!
//! A dispatch run configures a mapping from HSM slot numbers to client data
//! fields, once for the primary template and (optionally) once for the
//! fallback. Selection is per item: an item falls back only when some field
//! the primary mapping needs is blank *and* a fallback is configured.

use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::status::{TEMPLATE_FALLBACK, TEMPLATE_PRIMARY};
use crate::text::format_br_date;

/// Field keys exposed to dispatch mappings. These are the column names the
/// CSV export uses as well, so operators configure both from one vocabulary.
pub const FIELD_KEYS: &[&str] = &[
    "nome_cliente",
    "codigo_cliente",
    "telefone",
    "valor",
    "data_vencimento",
    "codigo_barras",
    "pix_copia_cola",
    "link",
    "id_fatura",
];

/// The client data a dispatch item can draw slot values from.
#[derive(Debug, Clone, Default)]
pub struct ClientFields {
    pub name: String,
    pub code: String,
    pub phone: Option<String>,
    pub amount: Option<BigDecimal>,
    pub due_date: Option<NaiveDate>,
    pub barcode: Option<String>,
    pub pix: Option<String>,
    pub link: Option<String>,
    pub invoice_id: Option<String>,
}

impl ClientFields {
    /// Flatten into the field-key → display-string map dispatch mappings
    /// reference. Missing values render as empty strings (blank), dates in
    /// the `DD/MM/YYYY` form the provider templates expect.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        let mut map = BTreeMap::new();
        map.insert("nome_cliente".to_string(), self.name.clone());
        map.insert("codigo_cliente".to_string(), self.code.clone());
        map.insert("telefone".to_string(), opt(&self.phone));
        map.insert(
            "valor".to_string(),
            self.amount
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_default(),
        );
        map.insert(
            "data_vencimento".to_string(),
            self.due_date.map(format_br_date).unwrap_or_default(),
        );
        map.insert("codigo_barras".to_string(), opt(&self.barcode));
        map.insert("pix_copia_cola".to_string(), opt(&self.pix));
        map.insert("link".to_string(), opt(&self.link));
        map.insert("id_fatura".to_string(), opt(&self.invoice_id));
        map
    }
}

/// True for the values the selection rule treats as "empty":
/// missing, empty, or whitespace-only.
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Outcome of the template selection rule for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateChoice {
    /// `primary` or `fallback` (the value persisted on the item).
    pub variant: &'static str,
    /// Fields the primary mapping needed that were blank. Non-empty with a
    /// `primary` variant means the item proceeds with gaps (logged upstream).
    pub missing_fields: Vec<String>,
}

/// Apply the selection rule: stay on the primary template unless some field
/// its mapping references is blank and a fallback template + mapping exist.
pub fn choose_template(
    primary_mapping: &BTreeMap<String, String>,
    fields: &BTreeMap<String, String>,
    has_fallback: bool,
) -> TemplateChoice {
    let missing_fields: Vec<String> = primary_mapping
        .values()
        .filter(|field| {
            fields
                .get(field.as_str())
                .map(|v| is_blank(v))
                .unwrap_or(true)
        })
        .cloned()
        .collect();

    if !missing_fields.is_empty() && has_fallback {
        TemplateChoice {
            variant: TEMPLATE_FALLBACK,
            missing_fields,
        }
    } else {
        TemplateChoice {
            variant: TEMPLATE_PRIMARY,
            missing_fields,
        }
    }
}

/// Resolve a slot → field mapping into the flat slot → value map sent to the
/// provider. Unknown or blank fields resolve to the empty string.
pub fn resolve_variables(
    mapping: &BTreeMap<String, String>,
    fields: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    mapping
        .iter()
        .map(|(slot, field)| {
            let value = fields.get(field.as_str()).cloned().unwrap_or_default();
            (slot.clone(), value)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_fields() -> ClientFields {
        ClientFields {
            name: "MARIA SILVA".to_string(),
            code: "C100".to_string(),
            phone: Some("5511999990000".to_string()),
            amount: Some(BigDecimal::from_str("149.90").unwrap()),
            due_date: NaiveDate::from_ymd_opt(2026, 9, 10),
            barcode: Some("00190500954014481606906809350314".to_string()),
            pix: None,
            link: Some("https://boletos.example/abc".to_string()),
            invoice_id: Some("F-1".to_string()),
        }
    }

    // -- to_map ---------------------------------------------------------------

    #[test]
    fn field_map_covers_all_keys() {
        let map = sample_fields().to_map();
        for key in FIELD_KEYS {
            assert!(map.contains_key(*key), "missing key {key}");
        }
        assert_eq!(map["valor"], "149.90");
        assert_eq!(map["data_vencimento"], "10/09/2026");
        assert_eq!(map["pix_copia_cola"], "");
    }

    // -- is_blank -------------------------------------------------------------

    #[test]
    fn blank_detection() {
        assert!(is_blank(""));
        assert!(is_blank("   "));
        assert!(!is_blank("x"));
    }

    // -- choose_template ------------------------------------------------------

    #[test]
    fn primary_chosen_when_all_fields_present() {
        let fields = sample_fields().to_map();
        let primary = mapping(&[("1", "nome_cliente"), ("2", "valor")]);
        let choice = choose_template(&primary, &fields, true);
        assert_eq!(choice.variant, TEMPLATE_PRIMARY);
        assert!(choice.missing_fields.is_empty());
    }

    #[test]
    fn fallback_chosen_when_required_field_blank() {
        let fields = sample_fields().to_map();
        let primary = mapping(&[("1", "nome_cliente"), ("2", "pix_copia_cola")]);
        let choice = choose_template(&primary, &fields, true);
        assert_eq!(choice.variant, TEMPLATE_FALLBACK);
        assert_eq!(choice.missing_fields, vec!["pix_copia_cola"]);
    }

    #[test]
    fn primary_with_gaps_when_no_fallback() {
        let fields = sample_fields().to_map();
        let primary = mapping(&[("1", "pix_copia_cola")]);
        let choice = choose_template(&primary, &fields, false);
        assert_eq!(choice.variant, TEMPLATE_PRIMARY);
        assert_eq!(choice.missing_fields, vec!["pix_copia_cola"]);
    }

    #[test]
    fn unmapped_field_name_counts_as_missing() {
        let fields = sample_fields().to_map();
        let primary = mapping(&[("1", "no_such_field")]);
        let choice = choose_template(&primary, &fields, true);
        assert_eq!(choice.variant, TEMPLATE_FALLBACK);
    }

    #[test]
    fn empty_primary_mapping_stays_primary() {
        let fields = sample_fields().to_map();
        let choice = choose_template(&BTreeMap::new(), &fields, true);
        assert_eq!(choice.variant, TEMPLATE_PRIMARY);
        assert!(choice.missing_fields.is_empty());
    }

    // -- resolve_variables ----------------------------------------------------

    #[test]
    fn resolves_slots_to_field_values() {
        let fields = sample_fields().to_map();
        let map = mapping(&[("1", "nome_cliente"), ("2", "data_vencimento"), ("3", "pix_copia_cola")]);
        let resolved = resolve_variables(&map, &fields);
        assert_eq!(resolved["1"], "MARIA SILVA");
        assert_eq!(resolved["2"], "10/09/2026");
        assert_eq!(resolved["3"], "");
    }
}
