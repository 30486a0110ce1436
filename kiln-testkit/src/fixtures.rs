use chrono::{DateTime, Utc};
use kiln::processor::GeneratorSet;
use kiln::store::KindTables;
use kiln::{
    CartoonizeInput, ColoringPageInput, IllustrationInput, ImageResult, Job, JobId, JobInput,
    JobStore, StoryInput, StoryResult,
};
use std::sync::Arc;
use std::time::Duration;

use crate::ScriptedGenerator;

pub fn story_input() -> JobInput {
    JobInput::Story(StoryInput {
        prompt: "a lighthouse keeper who befriends a storm".into(),
        age_group: Some("6-8".into()),
        page_count: 8,
    })
}

pub fn illustration_input() -> JobInput {
    JobInput::Illustration(IllustrationInput {
        prompt: "a hedgehog reading by candlelight".into(),
        style: Some("watercolor".into()),
        width: 1024,
        height: 768,
    })
}

pub fn cartoonize_input() -> JobInput {
    JobInput::Cartoonize(CartoonizeInput {
        source_image_url: "https://cdn.example.test/uploads/family.jpg".into(),
        style: Some("comic".into()),
    })
}

pub fn coloring_page_input() -> JobInput {
    JobInput::ColoringPage(ColoringPageInput {
        subject: "a castle on a hill".into(),
        line_detail: Some("simple".into()),
    })
}

/// A story input that fails validation.
pub fn invalid_story_input() -> JobInput {
    JobInput::Story(StoryInput {
        prompt: "a bear who cannot sleep".into(),
        age_group: None,
        page_count: 0,
    })
}

pub fn image(url: &str) -> ImageResult {
    ImageResult {
        image_url: url.to_string(),
    }
}

pub fn story_result() -> StoryResult {
    StoryResult {
        title: "The Storm's Friend".into(),
        pages: vec![
            "Every night the keeper lit the lamp.".into(),
            "One night the storm knocked on the door.".into(),
        ],
    }
}

/// A pending job created at `created_at`, for seeding tables directly.
pub fn pending_job(input: JobInput, created_at: DateTime<Utc>) -> Job {
    Job::new(input, None, 3, created_at)
}

/// One scripted generator per kind, plus the set wired from them.
pub struct TestGenerators {
    pub story: Arc<ScriptedGenerator<StoryResult>>,
    pub illustration: Arc<ScriptedGenerator<ImageResult>>,
    pub cartoonize: Arc<ScriptedGenerator<ImageResult>>,
    pub coloring_page: Arc<ScriptedGenerator<ImageResult>>,
}

impl TestGenerators {
    /// Generators that all succeed immediately.
    pub fn succeeding() -> Self {
        Self {
            story: Arc::new(ScriptedGenerator::succeeding("story-writer", story_result())),
            illustration: Arc::new(ScriptedGenerator::succeeding(
                "illustrator",
                image("https://cdn.example.test/out/illustration.png"),
            )),
            cartoonize: Arc::new(ScriptedGenerator::succeeding(
                "cartoonizer",
                image("https://cdn.example.test/out/cartoon.png"),
            )),
            coloring_page: Arc::new(ScriptedGenerator::succeeding(
                "line-artist",
                image("https://cdn.example.test/out/coloring.png"),
            )),
        }
    }

    /// Succeeding generators that park every call until released.
    pub fn gated() -> Self {
        Self {
            story: Arc::new(ScriptedGenerator::succeeding("story-writer", story_result()).gated()),
            illustration: Arc::new(
                ScriptedGenerator::succeeding(
                    "illustrator",
                    image("https://cdn.example.test/out/illustration.png"),
                )
                .gated(),
            ),
            cartoonize: Arc::new(
                ScriptedGenerator::succeeding(
                    "cartoonizer",
                    image("https://cdn.example.test/out/cartoon.png"),
                )
                .gated(),
            ),
            coloring_page: Arc::new(
                ScriptedGenerator::succeeding(
                    "line-artist",
                    image("https://cdn.example.test/out/coloring.png"),
                )
                .gated(),
            ),
        }
    }

    pub fn set(&self) -> GeneratorSet {
        GeneratorSet::new(
            self.story.clone(),
            self.illustration.clone(),
            self.cartoonize.clone(),
            self.coloring_page.clone(),
        )
    }

    /// Release `n` calls on every gated generator.
    pub fn release_all(&self, n: usize) {
        self.story.release(n);
        self.illustration.release(n);
        self.cartoonize.release(n);
        self.coloring_page.release(n);
    }
}

/// Poll the store until `id` satisfies `predicate` or `deadline` elapses.
pub async fn wait_for_job<T, F>(
    store: &JobStore<T>,
    id: JobId,
    deadline: Duration,
    predicate: F,
) -> Option<Job>
where
    T: KindTables,
    F: Fn(&Job) -> bool,
{
    let poll = async {
        loop {
            if let Some(job) = store.find_by_id(id).await {
                if predicate(&job) {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(deadline, poll).await.ok()
}

/// Poll `check` until it holds or `deadline` elapses.
pub async fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(deadline, poll).await.is_ok()
}
