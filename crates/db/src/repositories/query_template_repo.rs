//! Repository for the `query_templates` and `template_variables` tables.

use campaign_core::template::SyncPlan;
use campaign_core::types::DbId;
use sqlx::PgPool;

use crate::models::query_template::{
    CreateQueryTemplate, CreateTemplateVariable, QueryTemplate, TemplateVariable,
};

const COLUMNS: &str = "id, title, description, sql_text, active, created_at, updated_at";

const VARIABLE_COLUMNS: &str =
    "id, template_id, name, label, kind, required, default_value, options, position, active";

/// Provides CRUD for query templates and reconciliation of their variables.
pub struct QueryTemplateRepo;

impl QueryTemplateRepo {
    /// Insert a new query template.
    pub async fn create(
        pool: &PgPool,
        input: &CreateQueryTemplate,
    ) -> Result<QueryTemplate, sqlx::Error> {
        let query = format!(
            "INSERT INTO query_templates (title, description, sql_text) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueryTemplate>(&query)
            .bind(&input.title)
            .bind(&input.description)
            .bind(&input.sql_text)
            .fetch_one(pool)
            .await
    }

    /// Find a query template by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<QueryTemplate>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM query_templates WHERE id = $1");
        sqlx::query_as::<_, QueryTemplate>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List active templates, newest first.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<QueryTemplate>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM query_templates \
             WHERE active \
             ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, QueryTemplate>(&query)
            .fetch_all(pool)
            .await
    }

    /// Update a template's SQL text and bump its updated_at.
    pub async fn update_sql(
        pool: &PgPool,
        id: DbId,
        sql_text: &str,
    ) -> Result<Option<QueryTemplate>, sqlx::Error> {
        let query = format!(
            "UPDATE query_templates SET sql_text = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueryTemplate>(&query)
            .bind(id)
            .bind(sql_text)
            .fetch_optional(pool)
            .await
    }

    // -----------------------------------------------------------------------
    // Template variables
    // -----------------------------------------------------------------------

    /// Insert a new template variable.
    pub async fn create_variable(
        pool: &PgPool,
        input: &CreateTemplateVariable,
    ) -> Result<TemplateVariable, sqlx::Error> {
        let query = format!(
            "INSERT INTO template_variables \
                (template_id, name, label, kind, required, default_value, options, position) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {VARIABLE_COLUMNS}"
        );
        sqlx::query_as::<_, TemplateVariable>(&query)
            .bind(input.template_id)
            .bind(&input.name)
            .bind(&input.label)
            .bind(&input.kind)
            .bind(input.required)
            .bind(&input.default_value)
            .bind(&input.options)
            .bind(input.position)
            .fetch_one(pool)
            .await
    }

    /// List all variables for a template in display order.
    pub async fn list_variables(
        pool: &PgPool,
        template_id: DbId,
    ) -> Result<Vec<TemplateVariable>, sqlx::Error> {
        let query = format!(
            "SELECT {VARIABLE_COLUMNS} FROM template_variables \
             WHERE template_id = $1 \
             ORDER BY position, name"
        );
        sqlx::query_as::<_, TemplateVariable>(&query)
            .bind(template_id)
            .fetch_all(pool)
            .await
    }

    /// List only the active variables for a template.
    pub async fn list_active_variables(
        pool: &PgPool,
        template_id: DbId,
    ) -> Result<Vec<TemplateVariable>, sqlx::Error> {
        let query = format!(
            "SELECT {VARIABLE_COLUMNS} FROM template_variables \
             WHERE template_id = $1 AND active \
             ORDER BY position, name"
        );
        sqlx::query_as::<_, TemplateVariable>(&query)
            .bind(template_id)
            .fetch_all(pool)
            .await
    }

    /// Flip the active flag for a named set of variables.
    pub async fn set_variables_active(
        pool: &PgPool,
        template_id: DbId,
        names: &[String],
        active: bool,
    ) -> Result<u64, sqlx::Error> {
        if names.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE template_variables SET active = $3 \
             WHERE template_id = $1 AND name = ANY($2)",
        )
        .bind(template_id)
        .bind(names)
        .bind(active)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Apply a reconciliation plan computed from the template's SQL text:
    /// create missing variables (text kind, derived label, appended to the
    /// display order), deactivate removed ones, reactivate restored ones.
    pub async fn apply_sync_plan(
        pool: &PgPool,
        template_id: DbId,
        plan: &SyncPlan,
    ) -> Result<(), sqlx::Error> {
        let existing = Self::list_variables(pool, template_id).await?;
        let mut position = existing.len() as i32;

        for name in &plan.create {
            let input = CreateTemplateVariable {
                template_id,
                name: name.clone(),
                label: campaign_core::template::default_label(name),
                kind: "text".to_string(),
                required: true,
                default_value: String::new(),
                options: String::new(),
                position,
            };
            Self::create_variable(pool, &input).await?;
            position += 1;
        }

        Self::set_variables_active(pool, template_id, &plan.deactivate, false).await?;
        Self::set_variables_active(pool, template_id, &plan.reactivate, true).await?;
        Ok(())
    }
}
