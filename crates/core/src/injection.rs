//! Parameter injection into ComfyUI workflow templates.
//!
//! A template is a ComfyUI API-format workflow: a JSON object keyed by
//! node id, each node carrying a `class_type` and an `inputs` object.
//! [`inject`] turns an abstract parameter map into a concrete workflow by
//! writing parameter values into named slots. It always works on a deep
//! copy; the caller's template is never touched.
//!
//! Known templates are described by [`TemplateProfile`] tables. Unknown
//! template names fall back to a generic path that only sets the prompt
//! text and reports an [`InjectionWarning::UnknownTemplate`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Negative prompt used when the caller does not supply one.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, watermark";

/// Default denoise strength for image-to-image runs.
pub const DEFAULT_IMG2IMG_DENOISE: f64 = 0.75;

/// Name of the parameter broadcast into every sampler node.
pub const SEED_PARAM: &str = "seed";

/// Name of the free-text parameter the generic path understands.
pub const PROMPT_PARAM: &str = "prompt";

/// Node class types that accept a noise seed.
const SAMPLER_CLASSES: &[&str] = &["KSampler", "KSamplerAdvanced", "SamplerCustom"];

/// Text-encoder class targeted by the generic injection path.
const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";

// ---------------------------------------------------------------------------
// Template profiles
// ---------------------------------------------------------------------------

/// Expected JSON kind of a slot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Text,
    Integer,
    Number,
}

impl SlotKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            SlotKind::Text => value.is_string(),
            SlotKind::Integer => value.is_i64() || value.is_u64(),
            SlotKind::Number => value.is_number(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Text => "string",
            SlotKind::Integer => "integer",
            SlotKind::Number => "number",
        }
    }
}

/// Value written when the parameter is absent.
#[derive(Debug, Clone, Copy)]
pub enum SlotDefault {
    Text(&'static str),
    Number(f64),
}

impl SlotDefault {
    fn to_value(self) -> Value {
        match self {
            SlotDefault::Text(s) => Value::String(s.to_string()),
            SlotDefault::Number(n) => serde_json::json!(n),
        }
    }
}

/// Binding of one request parameter to one node input.
#[derive(Debug, Clone, Copy)]
pub struct SlotBinding {
    pub param: &'static str,
    pub node_id: &'static str,
    pub input: &'static str,
    pub kind: SlotKind,
    /// Written when the parameter is absent; `None` keeps the template value.
    pub default: Option<SlotDefault>,
}

const fn slot(
    param: &'static str,
    node_id: &'static str,
    input: &'static str,
    kind: SlotKind,
) -> SlotBinding {
    SlotBinding {
        param,
        node_id,
        input,
        kind,
        default: None,
    }
}

/// Injection table for a known template.
#[derive(Debug)]
pub struct TemplateProfile {
    pub name: &'static str,
    pub slots: &'static [SlotBinding],
}

const TEXT_TO_IMAGE_SLOTS: &[SlotBinding] = &[
    slot("prompt", "6", "text", SlotKind::Text),
    SlotBinding {
        default: Some(SlotDefault::Text(DEFAULT_NEGATIVE_PROMPT)),
        ..slot("negative_prompt", "7", "text", SlotKind::Text)
    },
    slot("checkpoint", "4", "ckpt_name", SlotKind::Text),
    slot("width", "5", "width", SlotKind::Integer),
    slot("height", "5", "height", SlotKind::Integer),
    slot("batch_size", "5", "batch_size", SlotKind::Integer),
    slot("steps", "3", "steps", SlotKind::Integer),
    slot("cfg", "3", "cfg", SlotKind::Number),
    slot("sampler", "3", "sampler_name", SlotKind::Text),
    slot("scheduler", "3", "scheduler", SlotKind::Text),
    slot("filename_prefix", "9", "filename_prefix", SlotKind::Text),
];

const IMAGE_TO_IMAGE_SLOTS: &[SlotBinding] = &[
    slot("prompt", "6", "text", SlotKind::Text),
    SlotBinding {
        default: Some(SlotDefault::Text(DEFAULT_NEGATIVE_PROMPT)),
        ..slot("negative_prompt", "7", "text", SlotKind::Text)
    },
    slot("checkpoint", "4", "ckpt_name", SlotKind::Text),
    slot("image", "10", "image", SlotKind::Text),
    SlotBinding {
        default: Some(SlotDefault::Number(DEFAULT_IMG2IMG_DENOISE)),
        ..slot("denoise", "3", "denoise", SlotKind::Number)
    },
    slot("steps", "3", "steps", SlotKind::Integer),
    slot("cfg", "3", "cfg", SlotKind::Number),
    slot("filename_prefix", "9", "filename_prefix", SlotKind::Text),
];

const UPSCALE_SLOTS: &[SlotBinding] = &[
    slot("image", "1", "image", SlotKind::Text),
    slot("upscale_model", "2", "model_name", SlotKind::Text),
    slot("filename_prefix", "4", "filename_prefix", SlotKind::Text),
];

/// All templates with a dedicated injection table.
pub const KNOWN_TEMPLATES: &[TemplateProfile] = &[
    TemplateProfile {
        name: "text_to_image",
        slots: TEXT_TO_IMAGE_SLOTS,
    },
    TemplateProfile {
        name: "image_to_image",
        slots: IMAGE_TO_IMAGE_SLOTS,
    },
    TemplateProfile {
        name: "upscale",
        slots: UPSCALE_SLOTS,
    },
];

/// Look up the injection table for `name`.
pub fn known_template(name: &str) -> Option<&'static TemplateProfile> {
    KNOWN_TEMPLATES.iter().find(|p| p.name == name)
}

// ---------------------------------------------------------------------------
// Results and errors
// ---------------------------------------------------------------------------

/// Non-fatal conditions reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InjectionWarning {
    /// No injection table exists; only the generic path was applied.
    UnknownTemplate { template_name: String },
    /// The generic path found no text-encoder node to receive the prompt.
    PromptNotApplied,
    /// A `seed` parameter was present but not an integer.
    SeedIgnored { value: Value },
}

impl std::fmt::Display for InjectionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectionWarning::UnknownTemplate { template_name } => write!(
                f,
                "unknown template '{template_name}', applied generic injection"
            ),
            InjectionWarning::PromptNotApplied => {
                write!(f, "no {CLIP_TEXT_ENCODE_CLASS} node found for the prompt")
            }
            InjectionWarning::SeedIgnored { value } => {
                write!(f, "seed {value} is not an integer and was ignored")
            }
        }
    }
}

/// A concrete, backend-ready workflow plus any warnings.
#[derive(Debug, Clone)]
pub struct Injection {
    pub workflow: Value,
    pub warnings: Vec<InjectionWarning>,
}

/// Structural problems that make a template unusable.
#[derive(Debug, thiserror::Error)]
pub enum InjectionError {
    #[error("template is not a JSON object")]
    NotAnObject,

    #[error("template has no node '{node_id}' for parameter '{param}'")]
    MissingNode { node_id: String, param: String },

    #[error("node '{node_id}' has no inputs object")]
    MalformedNode { node_id: String },

    #[error("parameter '{param}' must be a {expected}, got {value}")]
    InvalidParameter {
        param: String,
        expected: &'static str,
        value: Value,
    },
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Build a concrete workflow from `template` for `template_name`.
///
/// Pure: `template` is deep-copied before any write.
pub fn inject(
    template: &Value,
    template_name: &str,
    parameters: &BTreeMap<String, Value>,
) -> Result<Injection, InjectionError> {
    let mut workflow = template.clone();
    let nodes = workflow.as_object_mut().ok_or(InjectionError::NotAnObject)?;
    let mut warnings = Vec::new();

    match known_template(template_name) {
        Some(profile) => apply_profile(nodes, profile, parameters)?,
        None => {
            warnings.push(InjectionWarning::UnknownTemplate {
                template_name: template_name.to_string(),
            });
            if let Some(prompt) = parameters.get(PROMPT_PARAM) {
                if !apply_generic_prompt(nodes, prompt)? {
                    warnings.push(InjectionWarning::PromptNotApplied);
                }
            }
        }
    }

    if let Some(seed) = parameters.get(SEED_PARAM) {
        if seed.is_i64() || seed.is_u64() {
            broadcast_seed(nodes, seed)?;
        } else {
            warnings.push(InjectionWarning::SeedIgnored {
                value: seed.clone(),
            });
        }
    }

    Ok(Injection { workflow, warnings })
}

fn apply_profile(
    nodes: &mut serde_json::Map<String, Value>,
    profile: &TemplateProfile,
    parameters: &BTreeMap<String, Value>,
) -> Result<(), InjectionError> {
    for binding in profile.slots {
        let value = match parameters.get(binding.param) {
            Some(v) => {
                if !binding.kind.accepts(v) {
                    return Err(InjectionError::InvalidParameter {
                        param: binding.param.to_string(),
                        expected: binding.kind.as_str(),
                        value: v.clone(),
                    });
                }
                v.clone()
            }
            None => match binding.default {
                Some(default) => default.to_value(),
                None => continue,
            },
        };

        let node = nodes
            .get_mut(binding.node_id)
            .ok_or_else(|| InjectionError::MissingNode {
                node_id: binding.node_id.to_string(),
                param: binding.param.to_string(),
            })?;
        node_inputs(node, binding.node_id)?.insert(binding.input.to_string(), value);
    }
    Ok(())
}

/// Write `prompt` into the first text-encoder node (lowest node id).
///
/// Returns `false` when no such node exists.
fn apply_generic_prompt(
    nodes: &mut serde_json::Map<String, Value>,
    prompt: &Value,
) -> Result<bool, InjectionError> {
    let mut candidates: Vec<&String> = nodes
        .iter()
        .filter(|(_, node)| class_type(node) == Some(CLIP_TEXT_ENCODE_CLASS))
        .map(|(id, _)| id)
        .collect();
    candidates.sort_by(|a, b| node_order(a, b));

    let Some(node_id) = candidates.first().map(|id| (*id).clone()) else {
        return Ok(false);
    };
    if let Some(node) = nodes.get_mut(&node_id) {
        node_inputs(node, &node_id)?.insert("text".to_string(), prompt.clone());
    }
    Ok(true)
}

/// Overwrite the seed of every sampler node.
///
/// `KSamplerAdvanced` names its input `noise_seed`; whichever key the node
/// already carries is overwritten, defaulting to `seed`.
fn broadcast_seed(
    nodes: &mut serde_json::Map<String, Value>,
    seed: &Value,
) -> Result<(), InjectionError> {
    for (node_id, node) in nodes.iter_mut() {
        let is_sampler = class_type(node).is_some_and(|c| SAMPLER_CLASSES.contains(&c));
        if !is_sampler {
            continue;
        }
        let inputs = node_inputs(node, node_id)?;
        let key = if inputs.contains_key("noise_seed") && !inputs.contains_key("seed") {
            "noise_seed"
        } else {
            "seed"
        };
        inputs.insert(key.to_string(), seed.clone());
    }
    Ok(())
}

fn class_type(node: &Value) -> Option<&str> {
    node.get("class_type").and_then(Value::as_str)
}

fn node_inputs<'a>(
    node: &'a mut Value,
    node_id: &str,
) -> Result<&'a mut serde_json::Map<String, Value>, InjectionError> {
    node.get_mut("inputs")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| InjectionError::MalformedNode {
            node_id: node_id.to_string(),
        })
}

/// Numeric node ids sort numerically, anything else lexically after them.
fn node_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
