#![forbid(unsafe_code)]

//! Paged search results and id extraction.
//!
//! The search backend returns pages of ranked results, each optionally
//! carrying a user summary. Only the user ids matter to the map; pages are
//! flattened in order and results without a user are dropped. A result
//! whose user object does not decode counts as having no user, so one bad
//! entry never costs the rest of its page.

use pinmap_core::id::{IdSet, UserId};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultPage {
    #[serde(alias = "resultsList")]
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    pub total_items: u64,
}

/// A ranked hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResult {
    #[serde(deserialize_with = "lenient_user")]
    pub user: Option<UserSummary>,
    pub rank: f64,
    pub snippet: String,
}

/// The user fields a result carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub city: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeUser {
    User(UserSummary),
    Malformed(#[allow(dead_code)] IgnoredAny),
}

fn lenient_user<'de, D>(deserializer: D) -> Result<Option<UserSummary>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<MaybeUser>::deserialize(deserializer)? {
        Some(MaybeUser::User(user)) => Some(user),
        Some(MaybeUser::Malformed(_)) | None => None,
    })
}

impl ResultPage {
    /// More pages follow this one.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.next_page_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// User ids across `pages`, in page order then result order. Results
/// without a user are skipped; duplicates are kept.
pub fn extract_ids<'a, I>(pages: I) -> Vec<UserId>
where
    I: IntoIterator<Item = &'a ResultPage>,
{
    pages
        .into_iter()
        .flat_map(|page| page.results.iter())
        .filter_map(|result| result.user.as_ref().map(|user| user.user_id))
        .collect()
}

/// Filter set for the users found across `pages`.
pub fn id_set_from_pages<'a, I>(pages: I) -> IdSet
where
    I: IntoIterator<Item = &'a ResultPage>,
{
    extract_ids(pages).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hit(id: Option<i64>) -> SearchResult {
        SearchResult {
            user: id.map(|id| UserSummary {
                user_id: UserId(id),
                username: format!("user{id}"),
                name: String::new(),
                city: String::new(),
            }),
            ..SearchResult::default()
        }
    }

    fn page(ids: &[Option<i64>]) -> ResultPage {
        ResultPage {
            results: ids.iter().copied().map(hit).collect(),
            ..ResultPage::default()
        }
    }

    #[test]
    fn extraction_keeps_order_and_duplicates() {
        let pages = [page(&[Some(7), None, Some(3)]), page(&[Some(3)])];
        assert_eq!(extract_ids(&pages), vec![UserId(7), UserId(3), UserId(3)]);
    }

    #[test]
    fn empty_pages_extract_nothing() {
        assert!(extract_ids(&[ResultPage::default()]).is_empty());
        assert!(extract_ids(&Vec::<ResultPage>::new()).is_empty());
    }

    #[test]
    fn id_set_deduplicates() {
        let pages = [page(&[Some(7), None, Some(3)]), page(&[Some(3)])];
        let set = id_set_from_pages(&pages);
        assert_eq!(set.len(), 2);
        assert!(set.contains(UserId(7)));
        assert!(set.contains(UserId(3)));
    }

    #[test]
    fn decodes_backend_json() {
        let page: ResultPage = serde_json::from_str(
            r#"{
                "resultsList": [
                    {"user": {"userId": 42, "username": "ana", "city": "Lisbon"}, "rank": 0.9},
                    {"snippet": "page without user"}
                ],
                "nextPageToken": "abc",
                "totalItems": 2
            }"#,
        )
        .unwrap();
        assert_eq!(extract_ids(std::iter::once(&page)), vec![UserId(42)]);
        assert!(page.has_more());
        assert_eq!(page.total_items, 2);
        assert_eq!(
            page.results[0].user.as_ref().map(|u| u.city.as_str()),
            Some("Lisbon")
        );
    }

    #[test]
    fn malformed_user_drops_only_its_result() {
        let page: ResultPage = serde_json::from_str(
            r#"{"results": [
                {"user": {"userId": 7}},
                {"user": {"username": "ghost"}},
                {"user": {"userId": "not-a-number"}},
                {"user": "garbage"},
                {"user": null},
                {"user": {"userId": 3}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(page.results.len(), 6);
        assert_eq!(extract_ids(std::iter::once(&page)), vec![UserId(7), UserId(3)]);
    }

    proptest! {
        #[test]
        fn extraction_is_order_preserving_flatten(
            pages in proptest::collection::vec(
                proptest::collection::vec(proptest::option::of(0i64..50), 0..8),
                0..6,
            ),
        ) {
            let built: Vec<ResultPage> = pages.iter().map(|p| page(p)).collect();
            let expected: Vec<UserId> =
                pages.iter().flatten().flatten().copied().map(UserId).collect();
            prop_assert_eq!(extract_ids(&built), expected);
        }
    }

    #[test]
    fn last_page_has_no_more() {
        let mut last = page(&[Some(1)]);
        assert!(!last.has_more());
        last.next_page_token = Some(String::new());
        assert!(!last.has_more());
    }
}
