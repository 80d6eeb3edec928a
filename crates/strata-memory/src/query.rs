//! Paginated, filtered listing of one layer.

use crate::codec::to_json;
use crate::rows::{
    context_from_row, experience_from_row, identity_from_row, memory_from_row,
    preference_from_row, CONTEXT_COLUMNS, EXPERIENCE_COLUMNS, IDENTITY_COLUMNS, MEMORY_COLUMNS,
    MEMORY_WIDTH, PREFERENCE_COLUMNS,
};
use crate::substrate::UserMemoryStore;
use rusqlite::types::Value;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{Layer, LayerDetail, MemoryItem, MemoryPage};
use strata_types::params::{QueryParams, SortField};
use tracing::debug;

/// A built listing: the join, the shared WHERE clause and its bound values.
struct Listing {
    select: String,
    from: String,
    filter: String,
    order: String,
    values: Vec<Value>,
}

fn detail_alias(layer: Layer) -> &'static str {
    match layer {
        Layer::Context => "c",
        Layer::Experience => "e",
        Layer::Identity => "i",
        Layer::Preference => "p",
    }
}

/// Score column a layer is ordered by. Identity rows have none.
fn sort_column(layer: Layer, sort: Option<SortField>) -> Option<&'static str> {
    match layer {
        Layer::Context => Some(match sort {
            Some(SortField::ScoreUrgency) => "c.score_urgency",
            _ => "c.score_impact",
        }),
        Layer::Experience => Some("e.score_confidence"),
        Layer::Preference => Some("p.score_priority"),
        Layer::Identity => None,
    }
}

fn build(user_id: &str, layer: Layer, params: &QueryParams) -> StrataResult<Listing> {
    let d = detail_alias(layer);
    let mut values: Vec<Value> = vec![Value::Text(user_id.to_string())];

    let (detail_columns, join) = match layer {
        Layer::Context => (
            CONTEXT_COLUMNS,
            "JOIN user_memories_contexts c ON c.user_id = m.user_id \
             AND EXISTS (SELECT 1 FROM json_each(c.user_memory_ids) WHERE value = m.id)",
        ),
        Layer::Experience => (
            EXPERIENCE_COLUMNS,
            "JOIN user_memories_experiences e ON e.user_memory_id = m.id AND e.user_id = m.user_id",
        ),
        Layer::Identity => (
            IDENTITY_COLUMNS,
            "JOIN user_memories_identities i ON i.user_memory_id = m.id AND i.user_id = m.user_id",
        ),
        Layer::Preference => (
            PREFERENCE_COLUMNS,
            "JOIN user_memories_preferences p ON p.user_memory_id = m.id AND p.user_id = m.user_id",
        ),
    };

    let mut filter = String::from("m.user_id = ? AND m.memory_layer = ?");
    values.push(Value::Text(layer.as_str().to_string()));

    if !params.categories.is_empty() {
        filter.push_str(" AND m.memory_category IN (SELECT value FROM json_each(?))");
        values.push(Value::Text(to_json(&params.categories)?));
    }

    let q = params.q.as_deref().map(str::trim).unwrap_or_default();
    if !q.is_empty() {
        filter.push_str(" AND (m.title LIKE ? OR m.summary LIKE ? OR m.details LIKE ?)");
        let pattern = format!("%{q}%");
        for _ in 0..3 {
            values.push(Value::Text(pattern.clone()));
        }
    }

    if !params.types.is_empty() {
        filter.push_str(&format!(" AND {d}.type IN (SELECT value FROM json_each(?))"));
        values.push(Value::Text(to_json(&params.types)?));
    }

    if !params.tags.is_empty() {
        filter.push_str(&format!(
            " AND (EXISTS (SELECT 1 FROM json_each({d}.tags) WHERE value IN (SELECT value FROM json_each(?))) \
              OR EXISTS (SELECT 1 FROM json_each(m.tags) WHERE value IN (SELECT value FROM json_each(?))))"
        ));
        let tags = to_json(&params.tags)?;
        values.push(Value::Text(tags.clone()));
        values.push(Value::Text(tags));
    }

    let dir = params.order.unwrap_or_default().as_sql();
    let mut order = String::new();
    if let Some(column) = sort_column(layer, params.sort) {
        order.push_str(&format!("{column} {dir}, "));
    }
    // Ties fall back to the detail row's own timestamps.
    order.push_str(&format!(
        "{d}.updated_at {dir}, {d}.created_at {dir}, m.id {dir}, {d}.id {dir}"
    ));

    Ok(Listing {
        select: format!("{MEMORY_COLUMNS}, {detail_columns}"),
        from: format!("user_memories m {join}"),
        filter,
        order,
        values,
    })
}

fn detail_from_row(layer: Layer, row: &rusqlite::Row<'_>) -> rusqlite::Result<LayerDetail> {
    Ok(match layer {
        Layer::Context => LayerDetail::Context(context_from_row(row, MEMORY_WIDTH)?),
        Layer::Experience => LayerDetail::Experience(experience_from_row(row, MEMORY_WIDTH)?),
        Layer::Identity => LayerDetail::Identity(identity_from_row(row, MEMORY_WIDTH)?),
        Layer::Preference => LayerDetail::Preference(preference_from_row(row, MEMORY_WIDTH)?),
    })
}

impl UserMemoryStore {
    /// List one layer (default context) with filters, ordering and pagination.
    ///
    /// `total` counts distinct base records matching the filters, independent
    /// of the page window. The page and the count run concurrently.
    pub async fn query_memories(&self, params: QueryParams) -> StrataResult<MemoryPage> {
        let layer = params.layer.unwrap_or(Layer::Context);
        let page = params.page.unwrap_or(1).max(1);
        let page_size = params
            .page_size
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        // Pages past the end read as empty rather than overflowing.
        let offset = (page - 1).saturating_mul(page_size);

        let listing = build(&self.user_id, layer, &params)?;
        let page_sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT {page_size} OFFSET {offset}",
            listing.select, listing.from, listing.filter, listing.order
        );
        let count_sql = format!(
            "SELECT COUNT(DISTINCT m.id) FROM {} WHERE {}",
            listing.from, listing.filter
        );
        let page_values = listing.values.clone();
        let count_values = listing.values;

        let (items, total) = tokio::try_join!(
            self.blocking(move |store| {
                let conn = store.lock()?;
                let mut stmt = conn
                    .prepare(&page_sql)
                    .map_err(|e| StrataError::Memory(e.to_string()))?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(page_values.iter()), |row| {
                        Ok(MemoryItem {
                            memory: memory_from_row(row, 0)?,
                            detail: detail_from_row(layer, row)?,
                        })
                    })
                    .map_err(|e| StrataError::Memory(e.to_string()))?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(|e| StrataError::Memory(e.to_string()))
            }),
            self.blocking(move |store| {
                let conn = store.lock()?;
                conn.query_row(
                    &count_sql,
                    rusqlite::params_from_iter(count_values.iter()),
                    |row| row.get::<_, i64>(0),
                )
                .map_err(|e| StrataError::Memory(e.to_string()))
            }),
        )?;

        debug!(
            user_id = %self.user_id,
            layer = %layer,
            page,
            page_size,
            total,
            returned = items.len(),
            "Queried memories"
        );

        Ok(MemoryPage {
            items,
            page,
            page_size,
            total: total.max(0) as u64,
        })
    }
}
