use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#([0-9A-Fa-f]{3}|[0-9A-Fa-f]{6})$").unwrap());

pub const DEFAULT_COLOR: &str = "#FFFFFF";
pub const DEFAULT_FONT_SIZE: u32 = 20;
pub const DEFAULT_SPEED: i64 = 300;
pub const DEFAULT_FONT_FAMILY: &str = "Microsoft YaHei";
/// Largest point size a record may carry.
pub const MAX_FONT_SIZE: u32 = 1000;

/// Process-unique handle for one danmaku. Allocated once per record and never
/// handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DanmakuId(u64);

impl DanmakuId {
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DanmakuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dm-{}", self.0)
    }
}

/// Font weight on the toolkit's 0..=99 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontWeight(pub i32);

impl FontWeight {
    pub const LIGHT: Self = Self(25);
    pub const NORMAL: Self = Self(50);
    pub const BOLD: Self = Self(75);
}

impl Default for FontWeight {
    fn default() -> Self {
        Self::NORMAL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    Oblique,
}

impl FontStyle {
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Normal),
            1 => Some(Self::Italic),
            2 => Some(Self::Oblique),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "italic" => Some(Self::Italic),
            "oblique" => Some(Self::Oblique),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#RGB` or `#RRGGBB`. Named colors are left to the renderer.
    pub fn parse_hex(value: &str) -> Option<Self> {
        let caps = HEX_COLOR_RE.captures(value.trim())?;
        let digits = caps.get(1)?.as_str();
        if digits.len() == 3 {
            let mut out = [0u8; 3];
            for (slot, ch) in out.iter_mut().zip(digits.chars()) {
                let v = ch.to_digit(16)? as u8;
                *slot = v * 16 + v;
            }
            Some(Self::new(out[0], out[1], out[2]))
        } else {
            let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
            Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("danmaku text must not be empty")]
    EmptyText,
    #[error("font size must be positive, got {0}")]
    NonPositiveFontSize(i64),
    #[error("font size {0} exceeds the maximum of {MAX_FONT_SIZE}")]
    FontSizeTooLarge(i64),
}

/// One message as it travels through the system. Read-only once built; every
/// surface that shows it shares the same value.
#[derive(Debug, Clone, PartialEq)]
pub struct DanmakuRecord {
    id: DanmakuId,
    pub text: String,
    pub color: String,
    pub font_size: u32,
    pub speed: i64,
    pub font_family: String,
    pub font_weight: FontWeight,
    pub font_style: FontStyle,
    pub text_decoration: String,
}

impl DanmakuRecord {
    /// Record with every optional attribute at its default.
    pub fn new(text: impl Into<String>) -> Result<Self, RecordError> {
        DanmakuBuilder::new(text).build()
    }

    pub fn builder(text: impl Into<String>) -> DanmakuBuilder {
        DanmakuBuilder::new(text)
    }

    pub fn id(&self) -> DanmakuId {
        self.id
    }

    pub fn rgb(&self) -> Option<Rgb> {
        Rgb::parse_hex(&self.color)
    }

    pub fn has_decoration(&self) -> bool {
        !self.text_decoration.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DanmakuBuilder {
    text: String,
    color: String,
    font_size: i64,
    speed: i64,
    font_family: String,
    font_weight: FontWeight,
    font_style: FontStyle,
    text_decoration: String,
}

impl DanmakuBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: DEFAULT_COLOR.to_string(),
            font_size: DEFAULT_FONT_SIZE as i64,
            speed: DEFAULT_SPEED,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            font_weight: FontWeight::NORMAL,
            font_style: FontStyle::Normal,
            text_decoration: String::new(),
        }
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn font_size(mut self, size: i64) -> Self {
        self.font_size = size;
        self
    }

    pub fn speed(mut self, speed: i64) -> Self {
        self.speed = speed;
        self
    }

    pub fn font_family(mut self, family: impl Into<String>) -> Self {
        self.font_family = family.into();
        self
    }

    pub fn font_weight(mut self, weight: FontWeight) -> Self {
        self.font_weight = weight;
        self
    }

    pub fn font_style(mut self, style: FontStyle) -> Self {
        self.font_style = style;
        self
    }

    pub fn text_decoration(mut self, decoration: impl Into<String>) -> Self {
        self.text_decoration = decoration.into();
        self
    }

    /// Validates the attributes and stamps a fresh id.
    pub fn build(self) -> Result<DanmakuRecord, RecordError> {
        if self.text.is_empty() {
            return Err(RecordError::EmptyText);
        }
        if self.font_size <= 0 {
            return Err(RecordError::NonPositiveFontSize(self.font_size));
        }
        let font_size = u32::try_from(self.font_size)
            .ok()
            .filter(|size| *size <= MAX_FONT_SIZE)
            .ok_or(RecordError::FontSizeTooLarge(self.font_size))?;
        Ok(DanmakuRecord {
            id: DanmakuId::next(),
            text: self.text,
            color: self.color,
            font_size,
            speed: self.speed,
            font_family: self.font_family,
            font_weight: self.font_weight,
            font_style: self.font_style,
            text_decoration: self.text_decoration,
        })
    }
}

/// Pixel footprint of a rendered label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LabelSize {
    pub width: i32,
    pub height: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let record = DanmakuRecord::new("hi").unwrap();
        assert_eq!(record.color, "#FFFFFF");
        assert_eq!(record.font_size, 20);
        assert_eq!(record.speed, 300);
        assert_eq!(record.font_family, "Microsoft YaHei");
        assert_eq!(record.font_weight, FontWeight::NORMAL);
        assert_eq!(record.font_style, FontStyle::Normal);
        assert!(!record.has_decoration());
    }

    #[test]
    fn ids_are_never_reused() {
        let a = DanmakuRecord::new("a").unwrap();
        let b = DanmakuRecord::new("a").unwrap();
        let c = a.clone();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), c.id());
        assert!(b.id().raw() > a.id().raw());
    }

    #[test]
    fn rejects_empty_text_and_bad_size() {
        assert_eq!(DanmakuRecord::new("").unwrap_err(), RecordError::EmptyText);
        assert_eq!(
            DanmakuRecord::builder("x").font_size(0).build().unwrap_err(),
            RecordError::NonPositiveFontSize(0)
        );
    }

    #[test]
    fn oversized_font_is_rejected() {
        let record = DanmakuRecord::builder("x")
            .font_size(MAX_FONT_SIZE as i64)
            .build()
            .unwrap();
        assert_eq!(record.font_size, MAX_FONT_SIZE);
        assert_eq!(
            DanmakuRecord::builder("x")
                .font_size(100_000_000)
                .build()
                .unwrap_err(),
            RecordError::FontSizeTooLarge(100_000_000)
        );
    }

    #[test]
    fn zero_speed_is_accepted() {
        let record = DanmakuRecord::builder("x").speed(0).build().unwrap();
        assert_eq!(record.speed, 0);
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(Rgb::parse_hex("#FFFFFF"), Some(Rgb::new(255, 255, 255)));
        assert_eq!(Rgb::parse_hex("#f00"), Some(Rgb::new(255, 0, 0)));
        assert_eq!(Rgb::parse_hex("#12ab9C"), Some(Rgb::new(0x12, 0xab, 0x9c)));
        assert_eq!(Rgb::parse_hex("red"), None);
        assert_eq!(Rgb::parse_hex("#12345"), None);
    }

    #[test]
    fn id_display_is_prefixed() {
        let id = DanmakuId::next();
        assert_eq!(id.to_string(), format!("dm-{}", id.raw()));
    }
}
