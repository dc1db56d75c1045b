//! Generation pipeline: source → buckets → title/content/ending slides.
//!
//! One core drives both the background job runner and the local `generate`
//! command. Collaborators are injected through [`PipelineContext`]; what
//! happens when a slide keeps failing is decided by a [`RetryPolicy`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::prompts::{self, SlidePrompt};
use super::publisher::IncrementalPublisher;
use crate::content::distributor::distribute;
use crate::content::loader::{load_instructions, load_records, resolve_source};
use crate::content::ContentRecord;
use crate::errors::PipelineError;
use crate::jobs::store::{JobStore, SlideStore};
use crate::jobs::tracker::JobTracker;
use crate::llm_client::SlideGenerator;
use crate::models::job::{GenerationProvider, JobConfig};
use crate::storage::{KeyLayout, ObjectStore};

/// Collaborators shared by every pipeline run.
#[derive(Clone)]
pub struct PipelineContext {
    pub storage: Arc<dyn ObjectStore>,
    pub jobs: Arc<dyn JobStore>,
    pub slides: Arc<dyn SlideStore>,
    pub generator: Arc<dyn SlideGenerator>,
    pub keys: KeyLayout,
}

impl PipelineContext {
    pub fn tracker(&self) -> JobTracker {
        JobTracker::new(self.jobs.clone())
    }

    pub fn publisher(&self) -> IncrementalPublisher {
        IncrementalPublisher::new(self.storage.clone(), self.slides.clone(), self.keys.clone())
    }
}

/// Scratch directory of one run. The source lives under `input/`, and an
/// optional `instructions.md` sits at the root.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    pub root: PathBuf,
    pub source_name: String,
}

impl JobWorkspace {
    pub fn new(root: impl Into<PathBuf>, source_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            source_name: source_name.into(),
        }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Retry policy
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExhausted {
    /// Fail the whole run with the last generation error.
    Abort,
    /// Log, drop the slide and carry on with the next one.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub on_exhausted: OnExhausted,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Background jobs: one attempt, the first failure fails the job.
    pub fn abort_on_failure() -> Self {
        Self {
            max_attempts: 1,
            on_exhausted: OnExhausted::Abort,
            retry_delay: Duration::ZERO,
        }
    }

    /// Local runs: `max_retries` extra attempts per slide, then skip it.
    pub fn retry_and_skip(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            on_exhausted: OnExhausted::Skip,
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub total_slides: usize,
    pub published: usize,
    /// Planned positions (1-based) that were dropped after exhausting retries.
    pub skipped: Vec<usize>,
}

// ────────────────────────────────────────────────────────────────────────────
// Slide plan
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlannedSlide {
    Title,
    Content(usize),
    Ending,
}

/// Title, then one slide per bucket, then ending.
fn plan_slides(config: &JobConfig, buckets: usize) -> Vec<PlannedSlide> {
    let mut plan = Vec::with_capacity(config.title_flag() + buckets + config.ending_flag());
    plan.extend((0..config.title_flag()).map(|_| PlannedSlide::Title));
    plan.extend((0..buckets).map(PlannedSlide::Content));
    plan.extend((0..config.ending_flag()).map(|_| PlannedSlide::Ending));
    plan
}

/// The prompt for `planned` plus the short preview stored on the slide record.
fn build_prompt(
    planned: PlannedSlide,
    config: &JobConfig,
    buckets: &[Vec<ContentRecord>],
    slide_number: usize,
    total_slides: usize,
    instructions: &str,
) -> (SlidePrompt, String) {
    match planned {
        PlannedSlide::Title => (
            prompts::title_prompt(config, slide_number, Utc::now()),
            config.title.clone(),
        ),
        PlannedSlide::Content(index) => {
            let bucket = &buckets[index];
            (
                prompts::content_prompt(config, bucket, slide_number, total_slides, instructions),
                prompts::content_topic(bucket, slide_number),
            )
        }
        PlannedSlide::Ending => (
            prompts::ending_prompt(config, slide_number),
            config.ending_slide.main_text.clone(),
        ),
    }
}

/// Loads the workspace source and distributes it. Deterministic for a given
/// source and config, which regeneration relies on.
pub async fn load_buckets(
    workspace: &JobWorkspace,
    config: &JobConfig,
) -> Result<Vec<Vec<ContentRecord>>, PipelineError> {
    let source = resolve_source(&workspace.input_dir(), &workspace.source_name).await?;
    let records = load_records(&source, config.pages_to_process).await?;
    let buckets = distribute(&records, config.number_of_slides);
    info!(
        "Distributed {} records into {} content slides",
        records.len(),
        buckets.len()
    );
    Ok(buckets)
}

async fn generate_with_policy(
    generator: &dyn SlideGenerator,
    provider: GenerationProvider,
    prompt: &SlidePrompt,
    policy: RetryPolicy,
) -> Result<String, String> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match generator.generate(provider, prompt).await {
            Ok(markup) => return Ok(markup),
            Err(e) => {
                warn!(
                    "Slide {} attempt {}/{} failed: {}",
                    prompt.slide_number, attempt, attempts, e
                );
                last_error = e.to_string();
                if attempt < attempts && !policy.retry_delay.is_zero() {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }
    }

    Err(last_error)
}

// ────────────────────────────────────────────────────────────────────────────
// Entry points
// ────────────────────────────────────────────────────────────────────────────

/// Generates and publishes every slide of `job_id`, in order.
///
/// Moves the job to `processing` and resets progress to `0/total` before the
/// first call. Slide numbers stay dense: a skipped slide does not leave a gap.
/// Cancellation is not checked between slides.
pub async fn run_pipeline(
    ctx: &PipelineContext,
    job_id: Uuid,
    config: &JobConfig,
    workspace: &JobWorkspace,
    policy: RetryPolicy,
) -> Result<PipelineOutcome, PipelineError> {
    let tracker = ctx.tracker();
    tracker.start(job_id).await?;

    let buckets = load_buckets(workspace, config).await?;
    let instructions = load_instructions(&workspace.root).await;
    let plan = plan_slides(config, buckets.len());
    let total = plan.len();

    tracker.begin(job_id, total).await?;
    info!(
        "Job {}: generating {} slides ({} content) with {:?}",
        job_id,
        total,
        buckets.len(),
        config.llm_provider
    );

    let publisher = ctx.publisher();
    let mut published = 0;
    let mut skipped = Vec::new();

    for (position, planned) in plan.iter().enumerate() {
        let slide_number = published + 1;
        let (prompt, preview) = build_prompt(
            *planned,
            config,
            &buckets,
            slide_number,
            total,
            &instructions,
        );

        match generate_with_policy(
            ctx.generator.as_ref(),
            config.llm_provider,
            &prompt,
            policy,
        )
        .await
        {
            Ok(markup) => {
                publisher
                    .publish(job_id, slide_number, prompt.slide_type, &markup, Some(&preview))
                    .await?;
                published += 1;
                tracker.progress(job_id, published, total).await?;
                info!("Job {}: slide {}/{} done", job_id, published, total);
            }
            Err(message) => match policy.on_exhausted {
                OnExhausted::Abort => return Err(PipelineError::Generation(message)),
                OnExhausted::Skip => {
                    warn!(
                        "Job {}: skipping {} slide at position {}: {}",
                        job_id,
                        prompt.slide_type.as_str(),
                        position + 1,
                        message
                    );
                    skipped.push(position + 1);
                }
            },
        }
    }

    Ok(PipelineOutcome {
        total_slides: total,
        published,
        skipped,
    })
}

/// Rewrites selected slides with extra instructions. The job status and
/// progress counters are left alone. Returns the slide numbers rewritten.
pub async fn regenerate_slides(
    ctx: &PipelineContext,
    job_id: Uuid,
    config: &JobConfig,
    workspace: &JobWorkspace,
    slide_numbers: &[usize],
    extra_instructions: &str,
) -> Result<Vec<usize>, PipelineError> {
    let mut config = config.clone();
    config.additional_prompt = format!(
        "{}\n\nADDITIONAL MODIFICATIONS: {}",
        config.additional_prompt, extra_instructions
    );

    let buckets = load_buckets(workspace, &config).await?;
    let instructions = load_instructions(&workspace.root).await;
    let plan = plan_slides(&config, buckets.len());
    let total = plan.len();
    let publisher = ctx.publisher();

    info!("Job {}: regenerating slides {:?}", job_id, slide_numbers);

    let mut rewritten = Vec::new();
    for &slide_number in slide_numbers {
        let Some(planned) = slide_number.checked_sub(1).and_then(|i| plan.get(i)) else {
            warn!(
                "Job {}: slide number {} out of range (1..={}), skipping",
                job_id, slide_number, total
            );
            continue;
        };

        let (prompt, preview) = build_prompt(
            *planned,
            &config,
            &buckets,
            slide_number,
            total,
            &instructions,
        );
        let markup = ctx
            .generator
            .generate(config.llm_provider, &prompt)
            .await
            .map_err(|e| PipelineError::Generation(e.to_string()))?;

        publisher
            .publish(job_id, slide_number, prompt.slide_type, &markup, Some(&preview))
            .await?;
        info!("Job {}: regenerated slide {}", job_id, slide_number);
        rewritten.push(slide_number);
    }

    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::errors::CANCELLED_MESSAGE;
    use crate::jobs::memory::MemoryStore;
    use crate::llm_client::LlmError;
    use crate::models::job::{Job, JobStatus};
    use crate::models::slide::SlideType;
    use crate::storage::MemoryObjectStore;

    const DECK: &str = "# Alpha\nalpha body\n\n# Poison\nPOISON body\n\n# Gamma\ngamma body\n";

    /// Echoes the slide number as markup; fails whenever the prompt mentions POISON.
    #[derive(Default)]
    struct ScriptedGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SlideGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _provider: GenerationProvider,
            prompt: &SlidePrompt,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.user.clone());
            if prompt.user.contains("POISON") {
                return Err(LlmError::Api {
                    status: 500,
                    message: "model overloaded".to_string(),
                });
            }
            Ok(format!(
                "<div id=\"slide\" style=\"width:1280px;height:720px\"><p>{}</p></div>",
                prompt.slide_number
            ))
        }
    }

    struct Fixture {
        ctx: PipelineContext,
        jobs: Arc<MemoryStore>,
        storage: Arc<MemoryObjectStore>,
        generator: Arc<ScriptedGenerator>,
        workspace: JobWorkspace,
        _dir: tempfile::TempDir,
    }

    async fn fixture(source: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("input")).unwrap();
        std::fs::write(dir.path().join("input").join("deck.md"), source).unwrap();

        let jobs = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryObjectStore::new());
        let generator = Arc::new(ScriptedGenerator::default());
        let ctx = PipelineContext {
            storage: storage.clone(),
            jobs: jobs.clone(),
            slides: jobs.clone(),
            generator: generator.clone(),
            keys: KeyLayout::new("decks"),
        };

        Fixture {
            ctx,
            jobs,
            storage,
            generator,
            workspace: JobWorkspace::new(dir.path(), "deck.md"),
            _dir: dir,
        }
    }

    async fn pending_job(fx: &Fixture, config: &JobConfig) -> Uuid {
        let job = Job::new("decks/uploads/x/deck.md".to_string(), config.clone());
        JobStore::create(fx.jobs.as_ref(), &job).await.unwrap();
        job.id
    }

    fn no_delay(policy: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            retry_delay: Duration::ZERO,
            ..policy
        }
    }

    #[tokio::test]
    async fn test_full_run_publishes_in_order() {
        let fx = fixture("# Alpha\nalpha body\n\n# Beta\nbeta body\n").await;
        let config = JobConfig::default();
        let id = pending_job(&fx, &config).await;

        let outcome = run_pipeline(
            &fx.ctx,
            id,
            &config,
            &fx.workspace,
            RetryPolicy::abort_on_failure(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.total_slides, 4);
        assert_eq!(outcome.published, 4);
        assert!(outcome.skipped.is_empty());

        let job = JobStore::get(fx.jobs.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.total_slides, 4);
        assert_eq!(job.completed_slides, 4);

        let slides = SlideStore::list_by_job(fx.jobs.as_ref(), id).await.unwrap();
        let types: Vec<SlideType> = slides.iter().map(|s| s.slide_type).collect();
        assert_eq!(
            types,
            vec![
                SlideType::Title,
                SlideType::Content,
                SlideType::Content,
                SlideType::Ending
            ]
        );
        assert_eq!(slides[1].content_preview.as_deref(), Some("Alpha"));

        let keys = fx.storage.list(&fx.ctx.keys.slides_prefix(id)).await.unwrap();
        assert_eq!(keys.len(), 4);
    }

    #[tokio::test]
    async fn test_total_counts_only_enabled_bookends() {
        let fx = fixture(DECK.replace("POISON", "fine").as_str()).await;
        let mut config = JobConfig::default();
        config.title_slide.enabled = false;
        config.number_of_slides = 2;
        let id = pending_job(&fx, &config).await;

        let outcome = run_pipeline(
            &fx.ctx,
            id,
            &config,
            &fx.workspace,
            RetryPolicy::abort_on_failure(),
        )
        .await
        .unwrap();

        // 3 records into 2 buckets, plus the ending slide
        assert_eq!(outcome.total_slides, 3);
        let slides = SlideStore::list_by_job(fx.jobs.as_ref(), id).await.unwrap();
        assert_eq!(slides[0].slide_type, SlideType::Content);
        assert_eq!(slides[0].slide_number, 1);
    }

    #[tokio::test]
    async fn test_abort_policy_fails_on_first_error() {
        let fx = fixture(DECK).await;
        let config = JobConfig::default();
        let id = pending_job(&fx, &config).await;

        let err = run_pipeline(
            &fx.ctx,
            id,
            &config,
            &fx.workspace,
            RetryPolicy::abort_on_failure(),
        )
        .await
        .unwrap_err();

        match err {
            PipelineError::Generation(msg) => assert!(msg.contains("model overloaded")),
            other => panic!("unexpected error: {other:?}"),
        }
        // title + Alpha were published before the failing slide
        let job = JobStore::get(fx.jobs.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(job.completed_slides, 2);
        assert_eq!(job.total_slides, 5);
        assert_eq!(fx.generator.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_and_skip_keeps_numbering_dense() {
        let fx = fixture(DECK).await;
        let config = JobConfig::default();
        let id = pending_job(&fx, &config).await;

        let outcome = run_pipeline(
            &fx.ctx,
            id,
            &config,
            &fx.workspace,
            no_delay(RetryPolicy::retry_and_skip(2)),
        )
        .await
        .unwrap();

        assert_eq!(outcome.total_slides, 5);
        assert_eq!(outcome.published, 4);
        assert_eq!(outcome.skipped, vec![3]);

        // 4 successes plus 3 attempts on the poisoned slide
        assert_eq!(fx.generator.prompts.lock().unwrap().len(), 7);

        let numbers: Vec<i32> = SlideStore::list_by_job(fx.jobs.as_ref(), id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.slide_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);

        let job = JobStore::get(fx.jobs.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(job.completed_slides, 4);
        assert!(job.completed_slides <= job.total_slides);
    }

    #[tokio::test]
    async fn test_cancelled_job_does_not_start() {
        let fx = fixture(DECK).await;
        let config = JobConfig::default();
        let id = pending_job(&fx, &config).await;
        fx.ctx.tracker().cancel(id).await.unwrap();

        let err = run_pipeline(
            &fx.ctx,
            id,
            &config,
            &fx.workspace,
            RetryPolicy::abort_on_failure(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        let job = JobStore::get(fx.jobs.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(job.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(fx.generator.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_input_is_input_error() {
        let fx = fixture(DECK).await;
        std::fs::remove_file(fx.workspace.input_dir().join("deck.md")).unwrap();
        let config = JobConfig::default();
        let id = pending_job(&fx, &config).await;

        let err = run_pipeline(
            &fx.ctx,
            id,
            &config,
            &fx.workspace,
            RetryPolicy::abort_on_failure(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[tokio::test]
    async fn test_regenerate_targets_same_bucket() {
        let fx = fixture("# Alpha\nalpha body\n\n# Beta\nbeta body\n").await;
        let config = JobConfig::default();
        let id = pending_job(&fx, &config).await;
        run_pipeline(
            &fx.ctx,
            id,
            &config,
            &fx.workspace,
            RetryPolicy::abort_on_failure(),
        )
        .await
        .unwrap();
        fx.generator.prompts.lock().unwrap().clear();

        let rewritten = regenerate_slides(
            &fx.ctx,
            id,
            &config,
            &fx.workspace,
            &[3, 0, 9],
            "use a darker palette",
        )
        .await
        .unwrap();

        assert_eq!(rewritten, vec![3]);
        let prompts = fx.generator.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("beta body"));
        assert!(prompts[0].contains("ADDITIONAL MODIFICATIONS: use a darker palette"));

        // status and counters untouched
        let job = JobStore::get(fx.jobs.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.completed_slides, 4);
        assert_eq!(
            SlideStore::list_by_job(fx.jobs.as_ref(), id).await.unwrap().len(),
            4
        );
    }
}
