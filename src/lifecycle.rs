//! Model installation state.
//!
//! [`ModelLifecycle`] tracks the known model set and whether a model download
//! ("pull") is in flight. It is a plain state machine: inbound frames go in,
//! [`LifecycleEffect`]s come out, and the session turns effects into events.
//!
//! ```text
//! Idle ──PullStarted(m)──► Pulling(m)
//!  ▲                           │
//!  └── PullSucceeded(m) ───────┤
//!  └── PullFailed(m) ──────────┘
//! ```
//!
//! At most one pull is tracked. Frames naming a different model while a pull
//! is in flight are shown to the user but do not change state.

use chatlink_protocol::{InboundFrame, ModelStatus, same_model};

/// Reply shown when a pull completes.
pub const PULL_SUCCEEDED_REPLY: &str = "Model successfully downloaded and ready to use!";

const PULL_STARTED_DEFAULT: &str = "Downloading model, this may take a few minutes...";
const PULL_FAILED_DEFAULT: &str = "Model download failed.";

/// Whether a model download is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PullState {
    /// No download in flight; input is enabled.
    #[default]
    Idle,
    /// `model` is downloading; input is disabled.
    Pulling {
        /// Model being downloaded.
        model: String,
        /// Latest status text from the backend.
        status_text: String,
    },
}

impl PullState {
    /// `true` when no pull is in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The model being pulled, if any.
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Pulling { model, .. } => Some(model),
        }
    }
}

/// A model known to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    /// Model identifier, e.g. `llama3.1` or `llama3.1:8b`.
    pub name: String,
    /// Whether the backend has it locally.
    pub installed: bool,
}

impl From<ModelStatus> for Model {
    fn from(status: ModelStatus) -> Self {
        Self {
            name: status.name,
            installed: status.installed,
        }
    }
}

/// How a model is presented in a picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLabel {
    /// Installed; usable immediately.
    Ready,
    /// Not installed; selecting it triggers a download on first use.
    WillDownload,
}

impl ModelLabel {
    /// Label for an installed flag.
    pub fn for_installed(installed: bool) -> Self {
        if installed {
            Self::Ready
        } else {
            Self::WillDownload
        }
    }

    /// Suffix appended to the model name.
    pub fn marker(self) -> &'static str {
        match self {
            Self::Ready => "✓",
            Self::WillDownload => "(Not Installed)",
        }
    }
}

impl std::fmt::Display for ModelLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.marker())
    }
}

/// Observable consequence of a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEffect {
    /// A pull began, or its status text changed.
    PullStarted {
        /// Model being downloaded.
        model: String,
        /// Status text to show.
        text: String,
    },
    /// The tracked pull finished.
    PullResolved {
        /// Model that was downloaded.
        model: String,
        /// Whether the download succeeded.
        success: bool,
        /// Text to show in place of the status message.
        text: String,
    },
    /// User input became enabled or disabled.
    InputEnabled(bool),
    /// Informational text that does not change state.
    Display(String),
    /// The model set should be refreshed from the backend.
    RefreshStatus,
}

/// Tracks the model set and the single in-flight pull.
#[derive(Debug, Default)]
pub struct ModelLifecycle {
    pull: PullState,
    models: Vec<Model>,
}

impl ModelLifecycle {
    /// Create an idle lifecycle with no known models.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current pull state.
    pub fn pull_state(&self) -> &PullState {
        &self.pull
    }

    /// Input is enabled exactly when no pull is in flight.
    pub fn input_enabled(&self) -> bool {
        self.pull.is_idle()
    }

    /// Last known model set.
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Installed flag for `name`, if the model set mentions it.
    ///
    /// An exact name match wins; otherwise a tagged/untagged variant of the
    /// same model is accepted.
    pub fn installed(&self, name: &str) -> Option<bool> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .or_else(|| self.models.iter().find(|m| same_model(&m.name, name)))
            .map(|m| m.installed)
    }

    /// Apply a lifecycle frame. Replies produce no effects.
    ///
    /// The frame's model name must already be resolved (see
    /// [`InboundFrame::with_default_model`]).
    pub fn apply(&mut self, frame: &InboundFrame) -> Vec<LifecycleEffect> {
        match frame {
            InboundFrame::Reply { .. } => Vec::new(),
            InboundFrame::PullStarted { model_name, text } => self.on_started(model_name, text),
            InboundFrame::PullSucceeded { model_name, text } => {
                self.on_succeeded(model_name, text)
            }
            InboundFrame::PullFailed { model_name, text } => self.on_failed(model_name, text),
        }
    }

    fn on_started(&mut self, model: &str, text: &str) -> Vec<LifecycleEffect> {
        let text = non_empty(text, PULL_STARTED_DEFAULT);
        if self.pull.is_idle() {
            tracing::info!(model, "model pull started");
            self.pull = PullState::Pulling {
                model: model.to_owned(),
                status_text: text.clone(),
            };
            return vec![
                LifecycleEffect::PullStarted {
                    model: model.to_owned(),
                    text,
                },
                LifecycleEffect::InputEnabled(false),
            ];
        }
        match &mut self.pull {
            PullState::Idle => Vec::new(),
            PullState::Pulling {
                model: pulling,
                status_text,
            } if same_model(pulling.as_str(), model) => {
                *status_text = text.clone();
                vec![LifecycleEffect::PullStarted {
                    model: pulling.clone(),
                    text,
                }]
            }
            PullState::Pulling { model: pulling, .. } => {
                tracing::warn!(pulling = %pulling, model, "second pull announced while one is in flight");
                vec![LifecycleEffect::Display(text)]
            }
        }
    }

    fn on_succeeded(&mut self, model: &str, text: &str) -> Vec<LifecycleEffect> {
        match &self.pull {
            PullState::Pulling { model: pulling, .. } if same_model(pulling.as_str(), model) => {
                let pulling = pulling.clone();
                tracing::info!(model = %pulling, "model pull succeeded");
                self.pull = PullState::Idle;
                self.mark_installed(&pulling);
                vec![
                    LifecycleEffect::PullResolved {
                        model: pulling,
                        success: true,
                        text: PULL_SUCCEEDED_REPLY.to_owned(),
                    },
                    LifecycleEffect::InputEnabled(true),
                    LifecycleEffect::RefreshStatus,
                ]
            }
            PullState::Pulling { model: pulling, .. } => {
                tracing::debug!(pulling = %pulling, model, "pull success for untracked model");
                self.mark_installed(model);
                vec![
                    LifecycleEffect::Display(non_empty(text, PULL_SUCCEEDED_REPLY)),
                    LifecycleEffect::RefreshStatus,
                ]
            }
            PullState::Idle => {
                tracing::debug!(model, "pull success while idle");
                self.mark_installed(model);
                vec![LifecycleEffect::RefreshStatus]
            }
        }
    }

    fn on_failed(&mut self, model: &str, text: &str) -> Vec<LifecycleEffect> {
        let text = non_empty(text, PULL_FAILED_DEFAULT);
        match &self.pull {
            PullState::Pulling { model: pulling, .. } if same_model(pulling.as_str(), model) => {
                let pulling = pulling.clone();
                tracing::warn!(model = %pulling, "model pull failed: {text}");
                self.pull = PullState::Idle;
                vec![
                    LifecycleEffect::PullResolved {
                        model: pulling,
                        success: false,
                        text,
                    },
                    LifecycleEffect::InputEnabled(true),
                ]
            }
            _ => {
                tracing::debug!(model, "pull failure for untracked model");
                vec![LifecycleEffect::Display(text)]
            }
        }
    }

    fn mark_installed(&mut self, model: &str) {
        for m in self.models.iter_mut().filter(|m| same_model(&m.name, model)) {
            m.installed = true;
        }
    }

    /// Replace the model set with a fresh status snapshot.
    ///
    /// Returns the new label for `active` when its installed flag is known
    /// and differs from before (or was unknown before). Pull state is never
    /// touched.
    pub fn replace_models(&mut self, models: Vec<Model>, active: &str) -> Option<ModelLabel> {
        let before = self.installed(active);
        self.models = models;
        let after = self.installed(active)?;
        (before != Some(after)).then(|| ModelLabel::for_installed(after))
    }
}

fn non_empty(text: &str, default: &str) -> String {
    if text.trim().is_empty() {
        default.to_owned()
    } else {
        text.to_owned()
    }
}
