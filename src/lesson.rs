use serde::{Deserialize, Serialize};
use std::fmt;

/// Route of the stand-alone spreadsheet page.
pub const FULL_VIEW_PATH: &str = "/full-spreadsheet";
/// Query parameter carrying the lesson key on the full-view route.
pub const LESSON_PARAM: &str = "lesson";

/// Identifies "the same" workbook across the embedded and full views.
///
/// Top-level lessons use their slug; sub-lessons compose the parent slug and
/// their own slug as `parent/sub`, matching the lesson's URL path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LessonKey(String);

impl LessonKey {
    pub fn new(slug: impl Into<String>) -> Self {
        LessonKey(slug.into())
    }

    pub fn sub_lesson(parent: &str, sub: &str) -> Self {
        LessonKey(format!("{}/{}", parent, sub))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Slug of the top-level lesson this key belongs to.
    pub fn lesson_slug(&self) -> &str {
        self.0.split_once('/').map_or(&self.0, |(parent, _)| parent)
    }

    pub fn sub_lesson_slug(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, sub)| sub)
    }

    /// Path plus query that opens this lesson in the full view.
    pub fn full_view_url(&self) -> String {
        format!(
            "{}?{}={}",
            FULL_VIEW_PATH,
            LESSON_PARAM,
            urlencoding::encode(&self.0)
        )
    }

    /// Reads the `lesson` parameter out of a query string (leading `?` allowed).
    pub fn from_query(query: &str) -> Option<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == LESSON_PARAM)
            .and_then(|(_, raw)| {
                let raw = raw.replace('+', " ");
                urlencoding::decode(&raw).ok().map(|s| s.into_owned())
            })
            .filter(|key| !key.trim().is_empty())
            .map(LessonKey)
    }
}

impl fmt::Display for LessonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LessonKey {
    fn from(s: &str) -> Self {
        LessonKey::new(s)
    }
}

/// A lesson's default practice data: the grid the widget starts from when
/// nothing has been saved yet, and the one a reset goes back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSeed {
    pub key: LessonKey,
    pub initial_data: Vec<Vec<String>>,
}

impl LessonSeed {
    pub fn new<R, C>(key: impl Into<LessonKey>, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        LessonSeed {
            key: key.into(),
            initial_data: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn find<'a>(seeds: &'a [LessonSeed], key: &LessonKey) -> Option<&'a LessonSeed> {
        seeds.iter().find(|seed| &seed.key == key)
    }
}

impl From<String> for LessonKey {
    fn from(s: String) -> Self {
        LessonKey(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_lesson_keys_compose_slugs() {
        let key = LessonKey::sub_lesson("what-is-excel", "cell-references");
        assert_eq!(key.as_str(), "what-is-excel/cell-references");
        assert_eq!(key.lesson_slug(), "what-is-excel");
        assert_eq!(key.sub_lesson_slug(), Some("cell-references"));
        assert_eq!(LessonKey::new("lesson-1").sub_lesson_slug(), None);
    }

    #[test]
    fn full_view_url_round_trips_through_query() {
        let key = LessonKey::sub_lesson("what-is-excel", "cell-references");
        let url = key.full_view_url();
        assert_eq!(
            url,
            "/full-spreadsheet?lesson=what-is-excel%2Fcell-references"
        );
        let (_, query) = url.split_once('?').unwrap();
        assert_eq!(LessonKey::from_query(query), Some(key));
    }

    #[test]
    fn query_without_lesson_is_none() {
        assert_eq!(LessonKey::from_query("?tab=1"), None);
        assert_eq!(LessonKey::from_query("lesson="), None);
        assert_eq!(
            LessonKey::from_query("?x=1&lesson=lesson-1"),
            Some(LessonKey::new("lesson-1"))
        );
    }
}
