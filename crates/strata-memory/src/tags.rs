//! Frequency-ranked tag and role clouds.

use crate::codec::to_json;
use crate::substrate::UserMemoryStore;
use rusqlite::types::Value;
use rusqlite::Connection;
use strata_types::error::{StrataError, StrataResult};
use strata_types::memory::{IdentityRoles, RoleCount, TagCount};
use strata_types::params::{RoleQuery, TagQuery};
use tracing::debug;

/// LIMIT/OFFSET for a 1-based page.
fn window(page: Option<i64>, size: Option<i64>, default_size: i64) -> (i64, i64) {
    let size = size.unwrap_or(default_size).max(1);
    let page = page.unwrap_or(1).max(1);
    (size, (page - 1).saturating_mul(size))
}

fn counts(conn: &Connection, sql: &str, values: &[Value]) -> StrataResult<Vec<(String, u64)>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StrataError::Memory(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
        })
        .map_err(|e| StrataError::Memory(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| StrataError::Memory(e.to_string()))
}

impl UserMemoryStore {
    /// Count tags across base records, optionally restricted to some layers.
    pub fn query_tags(&self, query: TagQuery) -> StrataResult<Vec<TagCount>> {
        let (limit, offset) = window(query.page, query.size, self.config.tag_page_size);
        let mut sql = String::from(
            "SELECT t.value AS tag, COUNT(*) AS n FROM user_memories m, json_each(m.tags) t \
             WHERE m.user_id = ? AND t.value IS NOT NULL AND t.value != ''",
        );
        let mut values = vec![Value::Text(self.user_id.clone())];
        if !query.layers.is_empty() {
            sql.push_str(" AND m.memory_layer IN (SELECT value FROM json_each(?))");
            let layers: Vec<&str> = query.layers.iter().map(|l| l.as_str()).collect();
            values.push(Value::Text(to_json(&layers)?));
        }
        sql.push_str(" GROUP BY t.value ORDER BY n DESC, tag ASC LIMIT ? OFFSET ?");
        values.push(Value::Integer(limit));
        values.push(Value::Integer(offset));

        let conn = self.lock()?;
        let tags: Vec<TagCount> = counts(&conn, &sql, &values)?
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect();
        debug!(user_id = %self.user_id, count = tags.len(), "Queried tags");
        Ok(tags)
    }

    /// Tag and role clouds over identity entries, paginated independently.
    pub async fn query_identity_roles(&self, query: RoleQuery) -> StrataResult<IdentityRoles> {
        let (limit, offset) = window(query.page, query.size, self.config.tag_page_size);
        let values = vec![
            Value::Text(self.user_id.clone()),
            Value::Integer(limit),
            Value::Integer(offset),
        ];
        let role_values = values.clone();

        let (tags, roles) = tokio::try_join!(
            self.blocking(move |store| {
                let conn = store.lock()?;
                counts(
                    &conn,
                    "SELECT t.value AS tag, COUNT(*) AS n FROM user_memories_identities i, json_each(i.tags) t \
                     WHERE i.user_id = ?1 AND t.value IS NOT NULL AND t.value != '' \
                     GROUP BY t.value ORDER BY n DESC, tag ASC LIMIT ?2 OFFSET ?3",
                    &values,
                )
            }),
            self.blocking(move |store| {
                let conn = store.lock()?;
                counts(
                    &conn,
                    "SELECT role, COUNT(*) AS n FROM user_memories_identities \
                     WHERE user_id = ?1 AND role IS NOT NULL AND role != '' \
                     GROUP BY role ORDER BY n DESC, role ASC LIMIT ?2 OFFSET ?3",
                    &role_values,
                )
            }),
        )?;

        Ok(IdentityRoles {
            tags: tags
                .into_iter()
                .map(|(tag, count)| TagCount { tag, count })
                .collect(),
            roles: roles
                .into_iter()
                .map(|(role, count)| RoleCount { role, count })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::window;
    use crate::test_support::{new_memory, sibling, store};
    use strata_types::memory::{Layer, TagCount};
    use strata_types::params::{NewContext, NewIdentity, RoleQuery, TagQuery};

    fn tagged(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_window() {
        assert_eq!(window(None, None, 10), (10, 0));
        assert_eq!(window(Some(3), Some(5), 10), (5, 10));
        assert_eq!(window(Some(0), Some(-1), 10), (1, 0));
        assert_eq!(window(Some(i64::MAX), Some(10), 10), (10, i64::MAX));
    }

    #[tokio::test]
    async fn test_pages_past_the_end_are_empty() {
        let store = store("u1");
        store
            .create_identity_memory(
                new_memory("a"),
                NewIdentity {
                    role: Some("friend".into()),
                    tags: tagged(&["school"]),
                    ..Default::default()
                },
            )
            .unwrap();
        let tags = store
            .query_tags(TagQuery {
                page: Some(i64::MAX),
                size: Some(10),
                ..Default::default()
            })
            .unwrap();
        assert!(tags.is_empty());
        let clouds = store
            .query_identity_roles(RoleQuery {
                page: Some(i64::MAX),
                size: Some(10),
            })
            .await
            .unwrap();
        assert!(clouds.tags.is_empty());
        assert!(clouds.roles.is_empty());
    }

    #[test]
    fn test_tags_ranked_and_filtered() {
        let store = store("u1");
        store
            .create_context_memory(
                new_memory("a"),
                NewContext {
                    tags: tagged(&["work", "travel", ""]),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .create_identity_memory(
                new_memory("b"),
                NewIdentity {
                    tags: tagged(&["work", "family"]),
                    ..Default::default()
                },
            )
            .unwrap();
        sibling(&store, "u2")
            .create_identity_memory(
                new_memory("c"),
                NewIdentity {
                    tags: tagged(&["secret"]),
                    ..Default::default()
                },
            )
            .unwrap();

        let all = store.query_tags(TagQuery::default()).unwrap();
        assert_eq!(
            all,
            vec![
                TagCount { tag: "work".into(), count: 2 },
                TagCount { tag: "family".into(), count: 1 },
                TagCount { tag: "travel".into(), count: 1 },
            ]
        );

        let identity = store
            .query_tags(TagQuery {
                layers: vec![Layer::Identity],
                ..Default::default()
            })
            .unwrap();
        let names: Vec<_> = identity.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["family", "work"]);

        let second = store
            .query_tags(TagQuery {
                page: Some(2),
                size: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].tag, "travel");
    }

    #[tokio::test]
    async fn test_identity_roles() {
        let store = store("u1");
        for (role, tags) in [("friend", vec!["school"]), ("friend", vec![]), ("boss", vec!["work"])] {
            store
                .create_identity_memory(
                    new_memory(role),
                    NewIdentity {
                        role: Some(role.into()),
                        tags: tagged(&tags),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        store
            .create_identity_memory(new_memory("none"), NewIdentity::default())
            .unwrap();

        let clouds = store.query_identity_roles(RoleQuery::default()).await.unwrap();
        assert_eq!(clouds.roles.len(), 2);
        assert_eq!(clouds.roles[0].role, "friend");
        assert_eq!(clouds.roles[0].count, 2);
        let tags: Vec<_> = clouds.tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(tags, vec!["school", "work"]);
    }
}
