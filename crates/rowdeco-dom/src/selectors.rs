//! CSS selectors describing the host's thread list markup.

use serde::{Deserialize, Serialize};

/// Every selector is evaluated relative to a row element unless noted otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupSelectors {
    /// Matches the main element of a thread row.
    pub row: String,
    /// Classes that, all present on a row, mark the multi-line layout.
    pub vertical_classes: Vec<String>,
    pub subject: String,
    /// In the vertical layout the subject lives on the row's next sibling.
    pub vertical_subject: String,
    pub date_label: String,
    pub date_cell: String,
    pub participants: String,
    pub contact: String,
    pub selected_checkbox: String,
    pub label_container: String,
    /// Labels and images go before this child of their container.
    pub label_before: String,
    pub image_container: String,
    pub button_container: String,
    pub attachment_container: String,
    /// Evaluated on the row's parent: the cell carrying the keyboard cursor.
    pub cursor_cell: String,
    /// Closest ancestor of a row that survives the host re-rendering it.
    pub pool_anchor: Option<String>,
}

impl Default for MarkupSelectors {
    fn default() -> Self {
        Self {
            row: "tr.zA[id]".to_string(),
            vertical_classes: vec!["zA".to_string(), "apv".to_string()],
            subject: "td.a4W div.xS div.xT div.y6 > span[id]".to_string(),
            vertical_subject: "div.xS div.xT div.y6 > span[id]".to_string(),
            date_label: "td.xW > span, td.yf.apt > div.apm > span".to_string(),
            date_cell: "td.xW".to_string(),
            participants: "td.yX div.yW".to_string(),
            contact: "[email]".to_string(),
            selected_checkbox: "div[role=checkbox][aria-checked=true]".to_string(),
            label_container: "td.a4W div.xS div.xT".to_string(),
            label_before: ".y6".to_string(),
            image_container: "td.a4W div.xS div.xT".to_string(),
            button_container: "td.apU.xY, td.aqM.xY".to_string(),
            attachment_container: "td.yf.xY".to_string(),
            cursor_cell: "td.PE".to_string(),
            pool_anchor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_keep_the_remaining_defaults() {
        let selectors: MarkupSelectors = serde_json::from_str(
            r#"{ "row": "tr.thread", "pool_anchor": "div[data-thread-group]" }"#,
        )
        .unwrap();
        assert_eq!(selectors.row, "tr.thread");
        assert_eq!(selectors.pool_anchor.as_deref(), Some("div[data-thread-group]"));
        assert_eq!(selectors.date_cell, MarkupSelectors::default().date_cell);
    }
}
