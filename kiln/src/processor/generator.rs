use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::job::{
    CartoonizeInput, ColoringPageInput, IllustrationInput, ImageResult, JobInput, JobKind,
    JobResult, StoryInput, StoryResult,
};

use super::reporter::ProgressReporter;

/// An external collaborator that turns one kind's input into its result.
///
/// Implementations call whatever provider they wrap and may report
/// intermediate progress through `progress`.
#[async_trait]
pub trait Generator<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Name recorded against the job and in per-collaborator failure counts.
    fn name(&self) -> &str;

    async fn generate(&self, input: I, progress: &ProgressReporter) -> Result<O, GenerationError>;
}

pub type StoryGenerator = Arc<dyn Generator<StoryInput, StoryResult>>;
pub type IllustrationGenerator = Arc<dyn Generator<IllustrationInput, ImageResult>>;
pub type CartoonizeGenerator = Arc<dyn Generator<CartoonizeInput, ImageResult>>;
pub type ColoringPageGenerator = Arc<dyn Generator<ColoringPageInput, ImageResult>>;

/// One generator per job kind.
#[derive(Clone)]
pub struct GeneratorSet {
    pub story: StoryGenerator,
    pub illustration: IllustrationGenerator,
    pub cartoonize: CartoonizeGenerator,
    pub coloring_page: ColoringPageGenerator,
}

impl fmt::Debug for GeneratorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorSet")
            .field("story", &self.story.name())
            .field("illustration", &self.illustration.name())
            .field("cartoonize", &self.cartoonize.name())
            .field("coloring_page", &self.coloring_page.name())
            .finish()
    }
}

impl GeneratorSet {
    pub fn new(
        story: StoryGenerator,
        illustration: IllustrationGenerator,
        cartoonize: CartoonizeGenerator,
        coloring_page: ColoringPageGenerator,
    ) -> Self {
        Self {
            story,
            illustration,
            cartoonize,
            coloring_page,
        }
    }

    pub fn collaborator(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Story => self.story.name(),
            JobKind::Illustration => self.illustration.name(),
            JobKind::Cartoonize => self.cartoonize.name(),
            JobKind::ColoringPage => self.coloring_page.name(),
        }
    }

    /// Validate `input` and hand it to its kind's generator.
    ///
    /// Errors come back tagged with the collaborator that raised them.
    pub async fn run(
        &self,
        input: JobInput,
        progress: &ProgressReporter,
    ) -> Result<JobResult, GenerationError> {
        input.validate()?;

        let collaborator = self.collaborator(input.kind()).to_string();
        progress.touch(&collaborator);

        let outcome = match input {
            JobInput::Story(input) => self
                .story
                .generate(input, progress)
                .await
                .map(JobResult::Story),
            JobInput::Illustration(input) => self
                .illustration
                .generate(input, progress)
                .await
                .map(JobResult::Illustration),
            JobInput::Cartoonize(input) => self
                .cartoonize
                .generate(input, progress)
                .await
                .map(JobResult::Cartoonize),
            JobInput::ColoringPage(input) => self
                .coloring_page
                .generate(input, progress)
                .await
                .map(JobResult::ColoringPage),
        };

        outcome.map_err(|mut err| {
            err.collaborator.get_or_insert(collaborator);
            err
        })
    }
}
