//! Vision limitation resolver.
//! 视野限制解析
//!
//! Documents store per-category and per-detection-mode range limits in their
//! flags record. [`resolve`] turns that stored data into the read-model shown
//! by the configuration form: one resolved limit per category and per known
//! detection mode, sorted by label.
//!
//! Limits are tri-state. An absent value ([`LimitValue::Unset`]) means "use
//! the engine default", `null` ([`LimitValue::Unlimited`]) means no limit,
//! and a number is a range. Drawings have no categories of their own, so
//! their absent values stay unset; every other document treats an absent
//! category as unlimited.

use bevy::log::warn;
use bevy::prelude::Resource;
use icu_collator::{Collator, CollatorOptions, Strength};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Namespace of this crate's data inside a document's flags record.
pub const FLAG_SCOPE: &str = "vision-layers";

/// Kind of document the limitation is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Scene,
    Token,
    PrototypeToken,
    AmbientLight,
    AmbientSound,
    MeasuredTemplate,
    Tile,
    Drawing,
}

impl DocumentKind {
    /// Token-like documents keep the block under their light settings.
    pub fn is_token_like(self) -> bool {
        matches!(self, DocumentKind::Token | DocumentKind::PrototypeToken)
    }

    pub fn is_drawing(self) -> bool {
        self == DocumentKind::Drawing
    }
}

/// 探测类别
/// Detection category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    Sight,
    Sound,
    Move,
    Other,
}

impl DetectionType {
    /// Localization key of the category label.
    pub fn label_key(self) -> &'static str {
        match self {
            DetectionType::Sight => "VISIONLAYERS.Sight",
            DetectionType::Sound => "VISIONLAYERS.Sound",
            DetectionType::Move => "VISIONLAYERS.Move",
            DetectionType::Other => "VISIONLAYERS.Other",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DetectionType::Sight => "Sight",
            DetectionType::Sound => "Sound",
            DetectionType::Move => "Move",
            DetectionType::Other => "Other",
        }
    }
}

/// A detection mode known to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionModeDescriptor {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub ty: DetectionType,
}

impl DetectionModeDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, ty: DetectionType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ty,
        }
    }
}

/// Detection modes registered by the host, in registration order.
#[derive(Resource, Debug, Clone, Default, PartialEq)]
pub struct DetectionModes(pub Vec<DetectionModeDescriptor>);

impl DetectionModes {
    /// The host engine's built-in modes.
    pub fn core() -> Self {
        Self(vec![
            DetectionModeDescriptor::new("basicSight", "Basic Sight", DetectionType::Sight),
            DetectionModeDescriptor::new("lightPerception", "Light Perception", DetectionType::Sight),
            DetectionModeDescriptor::new("seeInvisibility", "See Invisibility", DetectionType::Sight),
            DetectionModeDescriptor::new("senseInvisibility", "Sense Invisibility", DetectionType::Other),
            DetectionModeDescriptor::new("feelTremor", "Feel Tremor", DetectionType::Move),
            DetectionModeDescriptor::new("seeAll", "See All", DetectionType::Sight),
            DetectionModeDescriptor::new("senseAll", "Sense All", DetectionType::Other),
        ])
    }

    pub fn register(&mut self, mode: DetectionModeDescriptor) {
        match self.0.iter_mut().find(|existing| existing.id == mode.id) {
            Some(existing) => *existing = mode,
            None => self.0.push(mode),
        }
    }
}

/// 限制值
/// A range limit
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LimitValue {
    /// Not stored; the engine default applies.
    #[default]
    Unset,
    /// Stored as `null`: no limit.
    Unlimited,
    /// Stored range, passed through unvalidated.
    Range(f64),
}

impl LimitValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, LimitValue::Unset)
    }

    pub fn range(&self) -> Option<f64> {
        match self {
            LimitValue::Range(range) => Some(*range),
            _ => None,
        }
    }

    /// `Unset` becomes `fallback`; stored values are kept.
    pub fn or(self, fallback: LimitValue) -> LimitValue {
        if self.is_unset() { fallback } else { self }
    }
}

impl fmt::Display for LimitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitValue::Unset => write!(f, "default"),
            LimitValue::Unlimited => write!(f, "unlimited"),
            LimitValue::Range(range) => write!(f, "{range}"),
        }
    }
}

// A present key deserializes to `Unlimited` or `Range`; a missing key is left
// to `#[serde(default)]`, which yields `Unset`.
impl<'de> Deserialize<'de> for LimitValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<f64>::deserialize(deserializer)? {
            Some(range) => LimitValue::Range(range),
            None => LimitValue::Unlimited,
        })
    }
}

impl Serialize for LimitValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LimitValue::Range(range) => serializer.serialize_f64(*range),
            LimitValue::Unset | LimitValue::Unlimited => serializer.serialize_none(),
        }
    }
}

/// Stored vision limitation block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionLimitationData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "LimitValue::is_unset")]
    pub sight: LimitValue,
    #[serde(skip_serializing_if = "LimitValue::is_unset")]
    pub sound: LimitValue,
    #[serde(rename = "move", skip_serializing_if = "LimitValue::is_unset")]
    pub move_: LimitValue,
    #[serde(skip_serializing_if = "LimitValue::is_unset")]
    pub other: LimitValue,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub detection: BTreeMap<String, LimitValue>,
}

impl VisionLimitationData {
    /// Reads the block of a `kind` document from its flags record.
    ///
    /// Fields are read one at a time. A malformed field is logged and treated
    /// as absent without discarding its siblings; a `null` detection map
    /// reads as empty.
    pub fn from_flags(flags: Option<&Value>, kind: DocumentKind) -> Self {
        let scoped = flags.and_then(|flags| flags.get(FLAG_SCOPE));
        let block = if kind.is_token_like() {
            scoped.and_then(|scoped| scoped.get("light"))
        } else {
            scoped
        }
        .and_then(|parent| parent.get("visionLimitation"));

        let fields = match block {
            None | Some(Value::Null) => return Self::default(),
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                warn!("Ignoring malformed vision limitation of {:?}: {}", kind, other);
                return Self::default();
            }
        };

        let limit = |name: &str| fields.get(name).map_or(LimitValue::Unset, |value| read_limit(kind, name, value));
        let enabled = match fields.get("enabled") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(enabled)) => Some(*enabled),
            Some(other) => {
                warn!("Ignoring malformed vision limitation flag enabled of {:?}: {}", kind, other);
                None
            }
        };
        let detection = match fields.get("detection") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(modes)) => modes
                .iter()
                .filter_map(|(id, value)| match read_limit(kind, id, value) {
                    LimitValue::Unset => None,
                    limit => Some((id.clone(), limit)),
                })
                .collect(),
            Some(other) => {
                warn!("Ignoring malformed detection limits of {:?}: {}", kind, other);
                BTreeMap::new()
            }
        };

        Self {
            enabled,
            sight: limit("sight"),
            sound: limit("sound"),
            move_: limit("move"),
            other: limit("other"),
            detection,
        }
    }

    pub fn category(&self, ty: DetectionType) -> LimitValue {
        match ty {
            DetectionType::Sight => self.sight,
            DetectionType::Sound => self.sound,
            DetectionType::Move => self.move_,
            DetectionType::Other => self.other,
        }
    }
}

// A present field holds `null` or a number; anything else reads as absent.
fn read_limit(kind: DocumentKind, name: &str, value: &Value) -> LimitValue {
    LimitValue::deserialize(value).unwrap_or_else(|err| {
        warn!("Ignoring malformed {} limit of {:?}: {}", name, kind, err);
        LimitValue::Unset
    })
}

/// Resolved limit of one detection mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionLimit {
    pub id: String,
    pub label: String,
    pub type_label: String,
    #[serde(skip_serializing_if = "LimitValue::is_unset")]
    pub limit: LimitValue,
}

/// 视野限制视图
/// Read-model handed to the configuration form
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionLimitationView {
    #[serde(skip_serializing_if = "LimitValue::is_unset")]
    pub sight_limit: LimitValue,
    #[serde(skip_serializing_if = "LimitValue::is_unset")]
    pub sound_limit: LimitValue,
    #[serde(skip_serializing_if = "LimitValue::is_unset")]
    pub move_limit: LimitValue,
    #[serde(skip_serializing_if = "LimitValue::is_unset")]
    pub other_limit: LimitValue,
    pub detection_limits: Vec<DetectionLimit>,
    pub is_enabled: Option<bool>,
    pub is_token: bool,
    pub is_drawing: bool,
}

impl VisionLimitationView {
    pub fn limit(&self, mode_id: &str) -> Option<LimitValue> {
        self.detection_limits
            .iter()
            .find(|limit| limit.id == mode_id)
            .map(|limit| limit.limit)
    }
}

/// Resolves the limitation of a `kind` document with English labels.
pub fn resolve(flags: Option<&Value>, kind: DocumentKind, modes: &[DetectionModeDescriptor]) -> VisionLimitationView {
    resolve_localized(flags, kind, modes, |key| {
        [DetectionType::Sight, DetectionType::Sound, DetectionType::Move, DetectionType::Other]
            .into_iter()
            .find(|ty| ty.label_key() == key)
            .map_or_else(|| key.to_string(), |ty| ty.label().to_string())
    })
}

/// Resolves the limitation, passing mode labels and category label keys
/// through `localize`.
pub fn resolve_localized(
    flags: Option<&Value>,
    kind: DocumentKind,
    modes: &[DetectionModeDescriptor],
    localize: impl Fn(&str) -> String,
) -> VisionLimitationView {
    let data = VisionLimitationData::from_flags(flags, kind);
    let drawing = kind.is_drawing();

    let category = |ty: DetectionType| {
        let value = data.category(ty);
        if drawing { value } else { value.or(LimitValue::Unlimited) }
    };

    let mut detection_limits: Vec<DetectionLimit> = modes
        .iter()
        .map(|mode| {
            let stored = data.detection.get(&mode.id).copied().unwrap_or_default();
            let limit = if drawing { stored } else { stored.or(category(mode.ty)) };
            DetectionLimit {
                id: mode.id.clone(),
                label: localize(&mode.label),
                type_label: localize(mode.ty.label_key()),
                limit,
            }
        })
        .collect();

    let collator = LabelCollator::new();
    detection_limits.sort_by(|a, b| collator.compare(&a.label, &b.label).then_with(|| a.id.cmp(&b.id)));

    VisionLimitationView {
        sight_limit: category(DetectionType::Sight),
        sound_limit: category(DetectionType::Sound),
        move_limit: category(DetectionType::Move),
        other_limit: category(DetectionType::Other),
        detection_limits,
        is_enabled: data.enabled,
        is_token: kind.is_token_like(),
        is_drawing: drawing,
    }
}

/// Orders labels the way a locale-aware UI lists them: accents and case are
/// secondary differences, and lowercase sorts before uppercase.
struct LabelCollator(Option<Collator>);

impl LabelCollator {
    fn new() -> Self {
        let mut options = CollatorOptions::new();
        options.strength = Some(Strength::Tertiary);
        match Collator::try_new(&Default::default(), options) {
            Ok(collator) => Self(Some(collator)),
            Err(err) => {
                warn!("Falling back to case-insensitive label order: {}", err);
                Self(None)
            }
        }
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        match &self.0 {
            Some(collator) => collator.compare(a, b),
            None => a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| b.cmp(a)),
        }
    }
}
