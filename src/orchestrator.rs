//! Generation pipeline for one session.
//!
//! Each request runs in two stages. The idea call fails fast. The image
//! fan-out waits for every call to settle and keeps the ones that succeed.
//! Every request gets a generation number, and a result is written back only
//! while that number is still current. A newer `generate_fresh`, `refine` or
//! `reset` therefore supersedes whatever is in flight.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::generator::{IdeaGenerator, IdeaRequest, ImageGenerator, ImageStyle};
use crate::models::{Concept, Constraints, ImageRef, Phase, SessionView};

pub const FRESH_ERROR_MESSAGE: &str = "We could not come up with an idea. Please try again.";
pub const REFINE_ERROR_MESSAGE: &str = "We could not refine this idea. Please try again.";

#[derive(Debug, Clone)]
pub struct Session {
    pub phase: Phase,
    pub concept: Option<Concept>,
    pub main_image: Option<ImageRef>,
    pub error_message: Option<String>,
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            concept: None,
            main_image: None,
            error_message: None,
            generation: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Session {
    fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.phase = Phase::GeneratingText;
        self.error_message = None;
        self.updated_at = Utc::now();
        self.generation
    }
}

pub struct Orchestrator {
    id: Uuid,
    ideas: Arc<dyn IdeaGenerator>,
    images: Arc<dyn ImageGenerator>,
    session: RwLock<Session>,
}

impl Orchestrator {
    pub fn new(id: Uuid, ideas: Arc<dyn IdeaGenerator>, images: Arc<dyn ImageGenerator>) -> Self {
        Self { id, ideas, images, session: RwLock::new(Session::default()) }
    }

    pub fn id(&self) -> Uuid { self.id }

    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    /// Time of the last state change, or `None` while a pipeline is running.
    pub fn idle_since(&self) -> Option<DateTime<Utc>> {
        let s = self.session.read();
        match s.phase {
            Phase::GeneratingText | Phase::GeneratingImages => None,
            _ => Some(s.updated_at),
        }
    }

    pub fn snapshot(&self) -> SessionView {
        let s = self.session.read();
        SessionView {
            id: self.id,
            phase: s.phase,
            cost_breakdown: s.concept.as_ref().map(Concept::cost_breakdown).unwrap_or_default(),
            concept: s.concept.clone(),
            main_image: s.main_image.clone(),
            error_message: s.error_message.clone(),
            updated_at: s.updated_at,
        }
    }

    pub async fn generate_fresh(&self, keyword: &str, constraints: Constraints) {
        let ticket = {
            let mut s = self.session.write();
            s.concept = None;
            s.main_image = None;
            s.begin()
        };
        info!(session = %self.id, ticket, "🚀 Generating concept for keyword: {}", keyword);
        let request = IdeaRequest::Fresh { keyword: keyword.to_string(), constraints };
        self.run(ticket, request, FRESH_ERROR_MESSAGE).await;
    }

    /// No-op unless the session already holds a concept.
    pub async fn refine(&self, instruction: &str) {
        let (ticket, current) = {
            let mut s = self.session.write();
            let Some(current) = s.concept.as_ref().map(Concept::without_images) else {
                debug!(session = %self.id, "refine ignored, no concept yet");
                return;
            };
            (s.begin(), current)
        };
        info!(session = %self.id, ticket, "🔁 Refining '{}': {}", current.name, instruction);
        let request = IdeaRequest::Refine { concept: current, instruction: instruction.to_string() };
        self.run(ticket, request, REFINE_ERROR_MESSAGE).await;
    }

    pub fn reset(&self) {
        let mut s = self.session.write();
        let generation = s.generation + 1;
        *s = Session { generation, ..Session::default() };
        info!(session = %self.id, "↩️ Session reset");
    }

    async fn run(&self, ticket: u64, request: IdeaRequest, failure_message: &str) {
        let concept = match self.ideas.generate_idea(&request).await {
            Ok(concept) => concept,
            Err(e) => {
                error!(session = %self.id, ticket, "❌ Idea generation failed: {}", e);
                self.apply(ticket, |s| {
                    s.phase = Phase::Failed;
                    s.error_message = Some(failure_message.to_string());
                });
                return;
            }
        };

        let stored = self.apply(ticket, |s| {
            s.concept = Some(concept.clone());
            s.phase = Phase::GeneratingImages;
        });
        if !stored {
            return;
        }

        let (main_image, sketches) = self.render_images(&concept).await;

        self.apply(ticket, |s| {
            s.main_image = main_image;
            if let Some(current) = s.concept.as_mut() {
                for (step, sketch) in current.recipe.iter_mut().zip(sketches) {
                    step.image = sketch;
                }
            }
            s.phase = Phase::Completed;
        });
    }

    /// Requests the photo and one sketch per recipe step concurrently; sketch `i` belongs to step `i`.
    async fn render_images(&self, concept: &Concept) -> (Option<ImageRef>, Vec<Option<ImageRef>>) {
        let photo = self.settle_image(&concept.main_visual_prompt, ImageStyle::Photo, "main visual".to_string());
        let sketches = join_all(concept.recipe.iter().map(|step| {
            self.settle_image(&step.visual_prompt, ImageStyle::Sketch, format!("step {}", step.step))
        }));
        let (main_image, sketches) = tokio::join!(photo, sketches);
        let rendered = sketches.iter().filter(|s| s.is_some()).count() + usize::from(main_image.is_some());
        info!(session = %self.id, "🖼️ {} of {} images rendered", rendered, sketches.len() + 1);
        (main_image, sketches)
    }

    async fn settle_image(&self, prompt: &str, style: ImageStyle, label: String) -> Option<ImageRef> {
        match self.images.generate_image(prompt, style).await {
            Ok(image) => {
                debug!(session = %self.id, "{:?} image for {} ready ({} chars)", style, label, image.as_str().len());
                Some(image)
            }
            Err(e) => {
                warn!(session = %self.id, "⚠️ Failed to generate {:?} image for {}: {}", style, label, e);
                None
            }
        }
    }

    /// Applies `update` only if `ticket` is still the current generation. Returns whether it was applied.
    fn apply(&self, ticket: u64, update: impl FnOnce(&mut Session)) -> bool {
        let mut s = self.session.write();
        if s.generation != ticket {
            debug!(session = %self.id, ticket, current = s.generation, "discarding stale result");
            return false;
        }
        update(&mut *s);
        s.updated_at = Utc::now();
        true
    }
}
