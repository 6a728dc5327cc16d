//! Content classification: which category directory a staged model belongs in.
//!
//! An ordered table of named predicates over the file name, its path relative
//! to the staging root, and its size. The first rule that matches wins; the
//! last rule always matches, so classification is total. Pure and
//! deterministic: the same inputs always produce the same category.

use std::fmt;
use std::path::{Path, PathBuf};

/// Extensions treated as model assets.
pub const MODEL_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "pt", "pth", "bin", "gguf", "sft"];

/// Files above this size that match no family marker are full checkpoints.
pub const LARGE_MODEL_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// True when `path` has a recognized model extension (case-insensitive).
pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            MODEL_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Checkpoint,
    Lora,
    Vae,
    ControlNet,
    Upscaler,
    Embedding,
    Clip,
    Unet,
    DiffusionModel,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Checkpoint,
        Category::Lora,
        Category::Vae,
        Category::ControlNet,
        Category::Upscaler,
        Category::Embedding,
        Category::Clip,
        Category::Unet,
        Category::DiffusionModel,
    ];

    /// Directory name under `models/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Checkpoint => "checkpoints",
            Category::Lora => "loras",
            Category::Vae => "vae",
            Category::ControlNet => "controlnet",
            Category::Upscaler => "upscale_models",
            Category::Embedding => "embeddings",
            Category::Clip => "clip",
            Category::Unet => "unet",
            Category::DiffusionModel => "diffusion_models",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// What the rules look at. Name and path are lowercased once up front.
#[derive(Debug, Clone)]
pub struct Candidate {
    name: String,
    path: String,
    size: u64,
}

impl Candidate {
    pub fn new(file_name: &str, relative_path: &Path, size: u64) -> Self {
        Candidate {
            name: file_name.to_ascii_lowercase(),
            path: relative_path.to_string_lossy().to_ascii_lowercase(),
            size,
        }
    }

    fn name_or_path_has(&self, markers: &[&str]) -> bool {
        markers
            .iter()
            .any(|m| self.name.contains(m) || self.path.contains(m))
    }

    fn name_has(&self, markers: &[&str]) -> bool {
        markers.iter().any(|m| self.name.contains(m))
    }

    /// A marker delimited by non-alphanumerics or the ends of the name.
    fn name_has_token(&self, markers: &[&str]) -> bool {
        markers.iter().any(|m| {
            self.name.match_indices(m).any(|(i, _)| {
                let before = self.name[..i].chars().next_back();
                let after = self.name[i + m.len()..].chars().next();
                !before.is_some_and(|c| c.is_ascii_alphanumeric())
                    && !after.is_some_and(|c| c.is_ascii_alphanumeric())
            })
        })
    }
}

/// A named, ordered classification rule.
pub struct Rule {
    pub name: &'static str,
    pub category: Category,
    matches: fn(&Candidate) -> bool,
}

const VAE: &[&str] = &["vae"];
const LORA: &[&str] = &["lora", "loha", "locon", "lycoris"];
const CONTROLNET: &[&str] = &["controlnet", "control_", "t2i-adapter", "t2i_adapter", "t2iadapter"];
const UPSCALER: &[&str] = &["esrgan", "swinir", "upscale", "ultrasharp", "scunet"];
const UPSCALE_PREFIXES: &[&str] = &["2x", "4x", "8x"];
const TEXT_ENCODER: &[&str] = &["clip", "t5xxl", "umt5", "text_encoder"];
const NOT_TEXT_ENCODER: &[&str] = &["transformer", "unet"];
/// Whole-word markers only: "dit" must not match inside "edit" or "credit".
const NOT_TEXT_ENCODER_TOKENS: &[&str] = &["dit", "mmdit"];
const UNET: &[&str] = &["unet"];
const EMBEDDING: &[&str] = &["embedding", "textual_inversion", "textual-inversion"];
const DIFFUSION_FAMILIES: &[&str] = &[
    "flux",
    "sd3",
    "hunyuan",
    "hidream",
    "wan2",
    "ltx",
    "mochi",
    "cosmos",
    "auraflow",
    "pixart",
    "qwen_image",
    "diffusion_model",
];

/// Priority order: first match wins.
pub const RULES: &[Rule] = &[
    Rule {
        name: "vae-marker",
        category: Category::Vae,
        matches: |c| c.name_or_path_has(VAE),
    },
    Rule {
        name: "lora-family",
        category: Category::Lora,
        matches: |c| c.name_or_path_has(LORA),
    },
    Rule {
        name: "controlnet",
        category: Category::ControlNet,
        matches: |c| c.name_or_path_has(CONTROLNET),
    },
    Rule {
        name: "upscaler",
        category: Category::Upscaler,
        matches: |c| {
            c.name_or_path_has(UPSCALER) || UPSCALE_PREFIXES.iter().any(|p| c.name.starts_with(p))
        },
    },
    Rule {
        name: "text-encoder",
        category: Category::Clip,
        matches: |c| {
            c.name_or_path_has(TEXT_ENCODER)
                && !c.name_has(NOT_TEXT_ENCODER)
                && !c.name_has_token(NOT_TEXT_ENCODER_TOKENS)
        },
    },
    Rule {
        name: "unet",
        category: Category::Unet,
        matches: |c| c.name_or_path_has(UNET),
    },
    Rule {
        name: "embedding",
        category: Category::Embedding,
        matches: |c| c.name_or_path_has(EMBEDDING),
    },
    Rule {
        name: "diffusion-family",
        category: Category::DiffusionModel,
        matches: |c| c.name_or_path_has(DIFFUSION_FAMILIES),
    },
    Rule {
        name: "large-checkpoint",
        category: Category::Checkpoint,
        matches: |c| c.size > LARGE_MODEL_BYTES,
    },
    Rule {
        name: "default",
        category: Category::Checkpoint,
        matches: |_| true,
    },
];

/// Result of classifying one staged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryAssignment {
    pub file: PathBuf,
    pub category: Category,
    /// Name of the rule that fired.
    pub rule: &'static str,
}

/// Apply the rule table. Total: the final rule always matches.
pub fn classify(file_name: &str, relative_path: &Path, size: u64) -> (Category, &'static str) {
    let candidate = Candidate::new(file_name, relative_path, size);
    RULES
        .iter()
        .find(|r| (r.matches)(&candidate))
        .map(|r| (r.category, r.name))
        .unwrap_or((Category::Checkpoint, "default"))
}

/// Classify a staged file at `path`, whose location relative to the staging root is `relative`.
pub fn assign(path: &Path, relative: &Path, size: u64) -> CategoryAssignment {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (category, rule) = classify(&name, relative, size);
    CategoryAssignment {
        file: path.to_path_buf(),
        category,
        rule,
    }
}
