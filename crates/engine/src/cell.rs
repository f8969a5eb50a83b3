use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Horizontal text alignment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

/// How a cell's evaluated value is rendered
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DisplayFormat {
    #[default]
    Text,
    Number,
    Currency,
    Date,
}

/// Cell formatting options.
///
/// Treated as an immutable value: updates go through [`FormatPatch`] and
/// produce a new format via [`CellFormat::merged`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CellFormat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>, // None = theme default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub alignment: Alignment,
    pub display_format: DisplayFormat,
}

/// Partial format update. `None` fields leave the target untouched.
///
/// For the optional string fields, `Some("")` resets the field to the default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FormatPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<Alignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_format: Option<DisplayFormat>,
}

impl FormatPatch {
    pub fn is_empty(&self) -> bool {
        *self == FormatPatch::default()
    }

    /// A patch that sets every field of `format`, used when a whole format is replaced.
    pub fn from_format(format: &CellFormat) -> Self {
        Self {
            background_color: Some(format.background_color.clone().unwrap_or_default()),
            text_color: Some(format.text_color.clone().unwrap_or_default()),
            font_size: format.font_size,
            font_family: Some(format.font_family.clone().unwrap_or_default()),
            bold: Some(format.bold),
            italic: Some(format.italic),
            underline: Some(format.underline),
            alignment: Some(format.alignment),
            display_format: Some(format.display_format),
        }
    }
}

fn merge_text(current: &Option<String>, patch: &Option<String>) -> Option<String> {
    match patch {
        None => current.clone(),
        Some(s) if s.is_empty() => None,
        Some(s) => Some(s.clone()),
    }
}

impl CellFormat {
    pub fn is_default(&self) -> bool {
        *self == CellFormat::default()
    }

    /// Shallow merge: fields present in `patch` replace ours.
    pub fn merged(&self, patch: &FormatPatch) -> CellFormat {
        CellFormat {
            background_color: merge_text(&self.background_color, &patch.background_color),
            text_color: merge_text(&self.text_color, &patch.text_color),
            font_size: patch.font_size.or(self.font_size),
            font_family: merge_text(&self.font_family, &patch.font_family),
            bold: patch.bold.unwrap_or(self.bold),
            italic: patch.italic.unwrap_or(self.italic),
            underline: patch.underline.unwrap_or(self.underline),
            alignment: patch.alignment.unwrap_or(self.alignment),
            display_format: patch.display_format.unwrap_or(self.display_format),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cell {
    /// Raw input as typed; a leading `=` marks a formula.
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "CellFormat::is_default")]
    pub format: CellFormat,
}

impl Cell {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), format: CellFormat::default() }
    }

    pub fn with_format(value: impl Into<String>, format: CellFormat) -> Self {
        Self { value: value.into(), format }
    }

    pub fn is_formula(&self) -> bool {
        self.value.starts_with('=')
    }

    /// An empty, default-formatted cell carries no information and is pruned from the grid.
    pub fn is_blank(&self) -> bool {
        self.value.is_empty() && self.format.is_default()
    }
}

/// Day zero of the spreadsheet date serial (serial 1 = 1899-12-31).
fn serial_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

/// Render an evaluated value according to a display format.
///
/// Non-numeric text and error markers are returned unchanged whatever the format.
pub fn format_display(value: &str, format: DisplayFormat) -> String {
    if format == DisplayFormat::Text || value.starts_with('#') {
        return value.to_string();
    }
    let Ok(n) = value.trim().parse::<f64>() else {
        return value.to_string();
    };
    match format {
        DisplayFormat::Text => value.to_string(),
        DisplayFormat::Number => format!("{:.2}", n),
        DisplayFormat::Currency => {
            if n < 0.0 {
                format!("-${:.2}", n.abs())
            } else {
                format!("${:.2}", n)
            }
        }
        DisplayFormat::Date => serial_epoch()
            .and_then(|epoch| epoch.checked_add_signed(Duration::days(n.floor() as i64)))
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| value.to_string()),
    }
}
