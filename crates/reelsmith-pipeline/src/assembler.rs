//! The media assembly pipeline.
//!
//! `assemble` drives one [`PipelineRun`] through staging, fitting, muxing,
//! fading, and concatenation. Per-scene work runs concurrently on a
//! [`JoinSet`], bounded by a semaphore shared with every other run of the
//! same pipeline. Concatenation is a barrier that consumes clips in
//! `scene_index` order regardless of completion order.
//!
//! Every path a run writes is registered with the [`TempResourceTracker`]
//! before it is produced, and a [`RunScope`] guard releases them on every
//! exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use reelsmith_av::{FadeSpec, MediaTool, MusicBed, MuxSpec};
use reelsmith_core::config::AssemblyConfig;
use reelsmith_core::{Error, Result, RunId};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::StatusSender;
use crate::job::{JobPhase, PipelineRun, RunStatus, SceneMediaJob};
use crate::stage::{staged_file_name, Stager};
use crate::tracker::{RunScope, TempResourceTracker};

/// Tunables for [`MediaAssemblyPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Parent of every run's private scratch directory.
    pub work_dir: PathBuf,
    /// Where finished advertisements are placed.
    pub output_dir: PathBuf,
    /// Fade length in seconds.
    pub fade_duration: f64,
    /// Background music volume relative to narration.
    pub music_volume: f32,
    /// Maximum scene jobs (and tool processes) in flight across all runs.
    pub max_concurrent_jobs: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &AssemblyConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            output_dir: config.output_dir.clone(),
            fade_duration: config.fade_duration().as_secs_f64(),
            music_volume: config.music_volume,
            max_concurrent_jobs: config.max_concurrent_jobs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Validation(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if !self.fade_duration.is_finite() || self.fade_duration < 0.0 {
            return Err(Error::Validation(format!(
                "fade duration must be a non-negative number of seconds, got {}",
                self.fade_duration
            )));
        }
        if !self.music_volume.is_finite() || self.music_volume < 0.0 {
            return Err(Error::Validation(format!(
                "music volume must be non-negative, got {}",
                self.music_volume
            )));
        }
        Ok(())
    }
}

/// Turns a [`PipelineRun`] into one finished video file.
pub struct MediaAssemblyPipeline {
    media: Arc<dyn MediaTool>,
    stager: Arc<Stager>,
    tracker: Arc<TempResourceTracker>,
    settings: PipelineSettings,
    workers: Arc<Semaphore>,
    status: Arc<StatusSender>,
}

impl MediaAssemblyPipeline {
    /// Build a pipeline over `media`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `settings` are out of range.
    pub fn new(
        media: Arc<dyn MediaTool>,
        stager: Stager,
        settings: PipelineSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            media,
            stager: Arc::new(stager),
            tracker: Arc::new(TempResourceTracker::new()),
            workers: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
            settings,
            status: Arc::new(StatusSender::noop()),
        })
    }

    /// Builder: share a tracker with other components.
    pub fn with_tracker(mut self, tracker: Arc<TempResourceTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Builder: receive run status changes.
    pub fn with_status(mut self, status: StatusSender) -> Self {
        self.status = Arc::new(status);
        self
    }

    pub fn tracker(&self) -> &Arc<TempResourceTracker> {
        &self.tracker
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Assemble `run` and return the path of the finished video.
    ///
    /// The run must be [`RunStatus::Pending`]. On return it is either
    /// `Completed` or `Failed`, and every temporary artifact it created has
    /// been removed. Dropping the returned future early also removes them.
    ///
    /// # Errors
    ///
    /// The first failure of any stage, wrapped in [`Error::Stage`] naming the
    /// stage and, for per-scene stages, the scene index.
    pub async fn assemble(&self, run: &mut PipelineRun) -> Result<PathBuf> {
        if run.status() != RunStatus::Pending {
            return Err(Error::Validation(format!(
                "run {} is {}, only pending runs can be assembled",
                run.run_id(),
                run.status()
            )));
        }

        let started = Instant::now();
        let run_id = run.run_id().clone();
        tracing::info!(
            run = %run_id,
            scenes = run.jobs().len(),
            output = run.output_name(),
            "Assembling advertisement"
        );

        let scope = self.tracker.scope(run_id.clone());
        let result = self.run_stages(run, &scope).await;
        let report = scope.release().await;
        if !report.is_clean() {
            tracing::warn!(
                run = %run_id,
                failed = report.failed.len(),
                "Some temp resources could not be removed"
            );
        }

        match result {
            Ok(path) => {
                self.transition(run, RunStatus::Completed)?;
                tracing::info!(
                    run = %run_id,
                    output = %path.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Advertisement assembled"
                );
                Ok(path)
            }
            Err(e) => {
                if run.fail() {
                    self.status.send(&run_id, RunStatus::Failed);
                }
                let cause = std::error::Error::source(&e)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                tracing::error!(run = %run_id, cause = %cause, "Assembly failed: {e}");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, run: &mut PipelineRun, scope: &RunScope) -> Result<PathBuf> {
        let run_dir = self.settings.work_dir.join(format!(
            "{}-{}",
            run.run_id().file_safe(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        let run_dir = std::path::absolute(&run_dir)
            .map_err(|e| Error::from(e).in_stage("prepare", None))?;
        scope.register(&run_dir);
        tokio::fs::create_dir_all(&run_dir)
            .await
            .map_err(|e| Error::from(e).in_stage("prepare", None))?;

        let music = match run.background_music() {
            Some(path) => {
                if tokio::fs::metadata(path).await.is_err() {
                    return Err(
                        Error::SourceNotFound(path.to_path_buf()).in_stage("prepare", None)
                    );
                }
                Some(MusicBed {
                    path: path.to_path_buf(),
                    volume: self.settings.music_volume,
                })
            }
            None => None,
        };

        self.transition(run, RunStatus::Staging)?;
        let finished = self.process_scenes(run, &run_dir, music).await?;
        let (jobs, clips): (Vec<SceneMediaJob>, Vec<PathBuf>) = finished.into_iter().unzip();
        run.replace_jobs(jobs);

        self.transition(run, RunStatus::Concatenating)?;
        let manifest = run_dir.join("concat_list.txt");
        let encoded = run_dir.join(run.output_name());
        scope.register(&manifest);
        scope.register(&encoded);

        self.transition(run, RunStatus::Encoding)?;
        {
            let _permit = self
                .workers
                .acquire()
                .await
                .map_err(|_| Error::Internal("worker pool closed".into()))?;
            self.media
                .concat(&clips, &encoded, &manifest)
                .await
                .map_err(|e| e.in_stage("concat", None))?;
        }

        let destination = self.settings.output_dir.join(format!(
            "{}_{}",
            run.run_id().file_safe(),
            run.output_name()
        ));
        finalize_output(&encoded, &destination)
            .await
            .map_err(|e| Error::from(e).in_stage("finalize", None))?;

        Ok(destination)
    }

    /// Run every scene's per-job stages concurrently and collect the faded
    /// clips in scene order. The first failure cancels the rest.
    async fn process_scenes(
        &self,
        run: &mut PipelineRun,
        run_dir: &Path,
        music: Option<MusicBed>,
    ) -> Result<Vec<(SceneMediaJob, PathBuf)>> {
        let jobs = run.jobs().to_vec();
        let count = jobs.len();
        let cancel = CancellationToken::new();
        let (phase_tx, mut phase_rx) = mpsc::unbounded_channel();

        let worker = Arc::new(SceneWorker {
            media: Arc::clone(&self.media),
            stager: Arc::clone(&self.stager),
            tracker: Arc::clone(&self.tracker),
            run_id: run.run_id().clone(),
            run_dir: run_dir.to_path_buf(),
            music,
            fade_duration: self.settings.fade_duration,
            workers: Arc::clone(&self.workers),
            cancel: cancel.clone(),
            phases: phase_tx,
        });

        let mut set = JoinSet::new();
        for (position, job) in jobs.into_iter().enumerate() {
            let worker = Arc::clone(&worker);
            let is_last = position + 1 == count;
            set.spawn(async move { worker.process(position, is_last, job).await });
        }
        drop(worker);

        let mut phases = vec![JobPhase::Queued; count];
        let mut finished = Vec::with_capacity(count);
        let mut failure = None;

        loop {
            tokio::select! {
                Some((position, phase)) = phase_rx.recv() => {
                    phases[position] = phase;
                    let slowest = phases.iter().copied().min().unwrap_or(JobPhase::Done);
                    self.transition(run, slowest.run_status())?;
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(item))) => finished.push(item),
                    Some(Ok(Err(e))) => {
                        failure = Some(e);
                        break;
                    }
                    Some(Err(join_err)) => {
                        failure = Some(Error::Internal(format!("scene task failed: {join_err}")));
                        break;
                    }
                },
            }
        }

        if let Some(err) = failure {
            tracing::warn!(
                run = %run.run_id(),
                in_flight = set.len(),
                "Scene failed, cancelling remaining scenes"
            );
            cancel.cancel();
            set.abort_all();
            while set.join_next().await.is_some() {}
            return Err(err);
        }

        finished.sort_by_key(|(job, _)| job.scene_index());
        Ok(finished)
    }

    fn transition(&self, run: &mut PipelineRun, next: RunStatus) -> Result<()> {
        if run.advance(next)? {
            tracing::debug!(run = %run.run_id(), status = %next, "Run status changed");
            self.status.send(run.run_id(), next);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MediaAssemblyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaAssemblyPipeline")
            .field("media", &self.media.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Everything one scene task needs, shared by all tasks of a run.
struct SceneWorker {
    media: Arc<dyn MediaTool>,
    stager: Arc<Stager>,
    tracker: Arc<TempResourceTracker>,
    run_id: RunId,
    run_dir: PathBuf,
    music: Option<MusicBed>,
    fade_duration: f64,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
    phases: mpsc::UnboundedSender<(usize, JobPhase)>,
}

impl SceneWorker {
    async fn process(
        &self,
        position: usize,
        is_last: bool,
        mut job: SceneMediaJob,
    ) -> Result<(SceneMediaJob, PathBuf)> {
        let index = job.scene_index();

        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(Error::Cancelled(format!("scene {index} before start")));
            }
            permit = self.workers.acquire() => {
                permit.map_err(|_| Error::Internal("worker pool closed".into()))?
            }
        };

        // Staging
        self.report(position, JobPhase::Staging);
        let source_name = staged_file_name(index, job.video_source());
        let dest = if job.video_source().is_remote() {
            self.track(&mut job, source_name)
        } else {
            self.run_dir.join(source_name)
        };
        let staged = self
            .stager
            .stage(job.video_source(), &dest)
            .await
            .map_err(|e| e.in_stage("stage", Some(index)))?;

        let duration = self
            .media
            .probe_duration(staged.path())
            .await
            .and_then(positive_duration)
            .map_err(|e| e.in_stage("probe", Some(index)))?;
        job.set_probed_duration(duration)?;
        tracing::debug!(run = %self.run_id, scene = index, duration, "Probed scene video");

        // Fitting
        self.checkpoint(index)?;
        self.report(position, JobPhase::Fitting);
        let narration = job.narration_source().to_path_buf();
        if tokio::fs::metadata(&narration).await.is_err() {
            return Err(Error::SourceNotFound(narration).in_stage("fit", Some(index)));
        }
        let fitted = self.track(&mut job, format!("scene_{index:03}_narration.wav"));
        self.media
            .fit_audio(&narration, duration, &fitted)
            .await
            .map_err(|e| e.in_stage("fit", Some(index)))?;

        // Muxing
        self.checkpoint(index)?;
        self.report(position, JobPhase::Muxing);
        let silent = self.track(&mut job, format!("scene_{index:03}_silent.mp4"));
        self.media
            .strip_audio(staged.path(), &silent)
            .await
            .map_err(|e| e.in_stage("strip", Some(index)))?;

        self.checkpoint(index)?;
        let voiced = self.track(&mut job, format!("scene_{index:03}_voiced.mp4"));
        let mux = MuxSpec {
            video: &silent,
            narration: &fitted,
            music: self.music.as_ref(),
            output: &voiced,
        };
        self.media
            .mux(&mux)
            .await
            .map_err(|e| e.in_stage("mux", Some(index)))?;

        // Fading
        self.checkpoint(index)?;
        self.report(position, JobPhase::Fading);
        let clip_duration = self
            .media
            .probe_duration(&voiced)
            .await
            .and_then(positive_duration)
            .map_err(|e| e.in_stage("fade", Some(index)))?;
        let fade = FadeSpec {
            fade_in: position != 0,
            fade_out: !is_last,
            duration: self.fade_duration,
            clip_duration,
        };
        let faded = self.track(&mut job, format!("scene_{index:03}_faded.mp4"));
        self.media
            .fade(&voiced, &faded, &fade)
            .await
            .map_err(|e| e.in_stage("fade", Some(index)))?;

        self.report(position, JobPhase::Done);
        tracing::debug!(run = %self.run_id, scene = index, "Scene ready");
        Ok((job, faded))
    }

    /// Register a new artifact path for this run before it is written.
    fn track(&self, job: &mut SceneMediaJob, name: String) -> PathBuf {
        let path = self.run_dir.join(name);
        self.tracker.register(&self.run_id, &path);
        job.push_artifact(path.clone());
        path
    }

    fn report(&self, position: usize, phase: JobPhase) {
        let _ = self.phases.send((position, phase));
    }

    fn checkpoint(&self, index: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("scene {index}")));
        }
        Ok(())
    }
}

fn positive_duration(seconds: f64) -> Result<f64> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(Error::Probe(format!("unusable duration {seconds}")))
    }
}

/// Move the encoded file out of the run directory. A rename is tried first;
/// across filesystems it falls back to copy and delete.
async fn finalize_output(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    if let Err(e) = tokio::fs::copy(from, to).await {
        let _ = tokio::fs::remove_file(to).await;
        return Err(e);
    }
    let _ = tokio::fs::remove_file(from).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    // -- Fake media tool -------------------------------------------------------
    //
    // Media files are small text files of `key=value` lines. Source clips
    // carry `scene=`, `duration=` and `audio=original`; narration carries
    // `voice=`. Each operation appends what it did so tests can read the
    // final output back.

    #[derive(Default)]
    struct FakeMedia {
        fail: Option<(&'static str, usize)>,
        delays: Vec<(&'static str, usize, Duration)>,
        active: AtomicUsize,
        peak: AtomicUsize,
        fits: Mutex<Vec<(usize, f64)>>,
        concatenated: Mutex<Vec<PathBuf>>,
        slow_finished: AtomicBool,
    }

    impl FakeMedia {
        fn failing(op: &'static str, scene: usize) -> Self {
            Self {
                fail: Some((op, scene)),
                ..Default::default()
            }
        }

        fn delayed(mut self, op: &'static str, scene: usize, by: Duration) -> Self {
            self.delays.push((op, scene, by));
            self
        }

        async fn step(&self, op: &'static str, scene: usize) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self
                .delays
                .iter()
                .find(|(o, s, _)| *o == op && *s == scene)
                .map(|(_, _, d)| *d);
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
                self.slow_finished.store(true, Ordering::SeqCst);
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail == Some((op, scene)) {
                return Err(Error::tool("fake", format!("{op} exploded")));
            }
            Ok(())
        }
    }

    fn read(path: &Path) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn write(path: &Path, contents: String) -> Result<()> {
        Ok(std::fs::write(path, contents)?)
    }

    fn value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
        let prefix = format!("{key}=");
        text.lines()
            .filter_map(|l| l.strip_prefix(prefix.as_str()))
            .last()
    }

    fn scene_of(text: &str) -> usize {
        value(text, "scene")
            .or_else(|| value(text, "voice"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(usize::MAX)
    }

    #[async_trait]
    impl MediaTool for FakeMedia {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn probe_duration(&self, path: &Path) -> Result<f64> {
            let text = read(path)?;
            value(&text, "duration")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| Error::Probe(format!("no duration in {}", path.display())))
        }

        async fn fit_audio(&self, audio: &Path, duration: f64, output: &Path) -> Result<()> {
            let text = read(audio)?;
            let scene = scene_of(&text);
            self.step("fit", scene).await?;
            self.fits.lock().push((scene, duration));
            write(output, format!("{text}fitted={duration}\n"))
        }

        async fn strip_audio(&self, video: &Path, output: &Path) -> Result<()> {
            let text = read(video)?;
            self.step("strip", scene_of(&text)).await?;
            write(output, text.replace("audio=original\n", ""))
        }

        async fn mux(&self, spec: &MuxSpec<'_>) -> Result<()> {
            let video = read(spec.video)?;
            self.step("mux", scene_of(&video)).await?;
            let narration = read(spec.narration)?;
            let music = spec
                .music
                .map(|m| format!("music={}\n", m.volume))
                .unwrap_or_default();
            write(spec.output, format!("{video}{narration}{music}"))
        }

        async fn fade(&self, input: &Path, output: &Path, spec: &FadeSpec) -> Result<()> {
            let text = read(input)?;
            self.step("fade", scene_of(&text)).await?;
            write(
                output,
                format!(
                    "{text}fade_in={}\nfade_out={}\nfade_len={}\n",
                    spec.fade_in, spec.fade_out, spec.duration
                ),
            )
        }

        async fn concat(&self, clips: &[PathBuf], output: &Path, scratch: &Path) -> Result<()> {
            self.concatenated.lock().extend(clips.iter().cloned());
            let manifest: Vec<String> = clips.iter().map(|c| c.display().to_string()).collect();
            write(scratch, manifest.join("\n"))?;
            self.step("concat", usize::MAX).await?;
            let mut segments = Vec::new();
            for clip in clips {
                segments.push(read(clip)?);
            }
            write(output, segments.join("---\n"))
        }
    }

    // -- Helpers ---------------------------------------------------------------

    struct Fixture {
        tmp: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            std::fs::create_dir(tmp.path().join("src")).unwrap();
            Self { tmp }
        }

        fn work_dir(&self) -> PathBuf {
            self.tmp.path().join("work")
        }

        fn output_dir(&self) -> PathBuf {
            self.tmp.path().join("out")
        }

        fn settings(&self, workers: usize) -> PipelineSettings {
            PipelineSettings {
                work_dir: self.work_dir(),
                output_dir: self.output_dir(),
                fade_duration: 0.7,
                music_volume: 0.2,
                max_concurrent_jobs: workers,
            }
        }

        fn pipeline(&self, media: Arc<FakeMedia>, workers: usize) -> MediaAssemblyPipeline {
            MediaAssemblyPipeline::new(
                media,
                Stager::new(Duration::from_secs(5)).unwrap(),
                self.settings(workers),
            )
            .unwrap()
        }

        fn scene(&self, index: usize, duration: f64) -> SceneMediaJob {
            let src = self.tmp.path().join("src");
            let video = src.join(format!("scene{index}.mp4"));
            let voice = src.join(format!("voice{index}.mp3"));
            std::fs::write(
                &video,
                format!("scene={index}\nduration={duration}\naudio=original\n"),
            )
            .unwrap();
            std::fs::write(&voice, format!("voice={index}\n")).unwrap();
            SceneMediaJob::new(index, video, voice)
        }

        fn source_files(&self) -> usize {
            std::fs::read_dir(self.tmp.path().join("src")).unwrap().count()
        }

        fn work_entries(&self) -> usize {
            match std::fs::read_dir(self.work_dir()) {
                Ok(entries) => entries.count(),
                Err(_) => 0,
            }
        }
    }

    fn segments(output: &Path) -> Vec<String> {
        std::fs::read_to_string(output)
            .unwrap()
            .split("---\n")
            .map(str::to_owned)
            .collect()
    }

    // -- Tests -----------------------------------------------------------------

    #[tokio::test]
    async fn assembles_scenes_in_index_order() {
        let fx = Fixture::new();
        let media = Arc::new(
            FakeMedia::default().delayed("fade", 0, Duration::from_millis(150)),
        );
        let pipeline = fx.pipeline(media.clone(), 4);
        let mut run = PipelineRun::new(
            "campaign-7",
            "ad.mp4",
            vec![fx.scene(2, 4.0), fx.scene(0, 5.0), fx.scene(1, 6.0)],
        )
        .unwrap();

        let output = pipeline.assemble(&mut run).await.unwrap();

        assert_eq!(output, fx.output_dir().join("campaign-7_ad.mp4"));
        let segs = segments(&output);
        let order: Vec<usize> = segs.iter().map(|s| scene_of(s)).collect();
        assert_eq!(order, vec![0, 1, 2]);

        let edges: Vec<(&str, &str)> = segs
            .iter()
            .map(|s| (value(s, "fade_in").unwrap(), value(s, "fade_out").unwrap()))
            .collect();
        assert_eq!(
            edges,
            vec![("false", "true"), ("true", "true"), ("true", "false")]
        );

        for seg in &segs {
            assert!(!seg.contains("audio=original"), "source audio leaked: {seg}");
            assert_eq!(value(seg, "fitted"), value(seg, "duration"));
        }

        assert_eq!(run.status(), RunStatus::Completed);
        let probed: Vec<Option<f64>> = run.jobs().iter().map(|j| j.probed_duration()).collect();
        assert_eq!(probed, vec![Some(5.0), Some(6.0), Some(4.0)]);
        assert!(run.jobs().iter().all(|j| j.stage_artifacts().len() == 4));
    }

    #[tokio::test]
    async fn fitted_audio_matches_probed_duration() {
        let fx = Fixture::new();
        let media = Arc::new(FakeMedia::default());
        let pipeline = fx.pipeline(media.clone(), 2);
        let mut run =
            PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0), fx.scene(1, 2.5)]).unwrap();

        pipeline.assemble(&mut run).await.unwrap();

        let mut fits = media.fits.lock().clone();
        fits.sort_by_key(|(scene, _)| *scene);
        assert_eq!(fits, vec![(0, 5.0), (1, 2.5)]);
    }

    /// `target` spelled relative to the current directory.
    fn relative_to_cwd(target: &Path) -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        let mut rel = PathBuf::new();
        for _ in cwd.components().skip(1) {
            rel.push("..");
        }
        rel.join(target.strip_prefix("/").unwrap())
    }

    #[tokio::test]
    async fn relative_work_dir_hands_absolute_clips_to_concat() {
        let fx = Fixture::new();
        let media = Arc::new(FakeMedia::default());
        let mut settings = fx.settings(2);
        settings.work_dir = relative_to_cwd(&fx.work_dir());
        assert!(settings.work_dir.is_relative());
        let pipeline = MediaAssemblyPipeline::new(
            media.clone(),
            Stager::new(Duration::from_secs(5)).unwrap(),
            settings,
        )
        .unwrap();
        let mut run =
            PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0), fx.scene(1, 5.0)]).unwrap();

        pipeline.assemble(&mut run).await.unwrap();

        let clips = media.concatenated.lock().clone();
        assert_eq!(clips.len(), 2);
        assert!(clips.iter().all(|c| c.is_absolute()), "{clips:?}");
        assert_eq!(fx.work_entries(), 0);
        assert_eq!(pipeline.tracker().outstanding(), 0);
    }

    #[tokio::test]
    async fn single_scene_has_no_fades() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::default()), 2);
        let mut run = PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0)]).unwrap();

        let output = pipeline.assemble(&mut run).await.unwrap();

        let segs = segments(&output);
        assert_eq!(segs.len(), 1);
        assert_eq!(value(&segs[0], "fade_in"), Some("false"));
        assert_eq!(value(&segs[0], "fade_out"), Some("false"));
    }

    #[tokio::test]
    async fn success_leaves_no_temp_files() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::default()), 2);
        let mut run =
            PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0), fx.scene(1, 5.0)]).unwrap();

        let output = pipeline.assemble(&mut run).await.unwrap();

        assert!(output.exists());
        assert_eq!(fx.work_entries(), 0);
        assert_eq!(pipeline.tracker().outstanding(), 0);
        assert_eq!(fx.source_files(), 4);
    }

    #[tokio::test]
    async fn stage_failure_removes_every_artifact() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::failing("mux", 1)), 4);
        let mut run = PipelineRun::new(
            "c1",
            "ad.mp4",
            vec![fx.scene(0, 5.0), fx.scene(1, 5.0), fx.scene(2, 5.0)],
        )
        .unwrap();

        let err = pipeline.assemble(&mut run).await.unwrap_err();

        assert_eq!(err.stage(), Some("mux"));
        assert_eq!(err.scene(), Some(1));
        let cause = std::error::Error::source(&err).expect("stage error has a cause");
        assert!(cause.to_string().contains("mux exploded"), "got: {cause}");
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(fx.work_entries(), 0);
        assert_eq!(pipeline.tracker().outstanding(), 0);
        assert!(!fx.output_dir().join("c1_ad.mp4").exists());
        assert_eq!(fx.source_files(), 6);
    }

    #[tokio::test]
    async fn concat_failure_discards_partial_output() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::failing("concat", usize::MAX)), 2);
        let mut run =
            PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0), fx.scene(1, 5.0)]).unwrap();

        let err = pipeline.assemble(&mut run).await.unwrap_err();

        assert_eq!(err.stage(), Some("concat"));
        assert_eq!(err.scene(), None);
        assert_eq!(fx.work_entries(), 0);
        assert!(!fx.output_dir().join("c1_ad.mp4").exists());
    }

    #[tokio::test]
    async fn failure_cancels_slow_siblings() {
        let fx = Fixture::new();
        let media = Arc::new(
            FakeMedia::failing("strip", 0).delayed("strip", 1, Duration::from_secs(30)),
        );
        let pipeline = fx.pipeline(media.clone(), 4);
        let mut run =
            PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0), fx.scene(1, 5.0)]).unwrap();

        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(10), pipeline.assemble(&mut run))
            .await
            .expect("assembly should not wait for the slow scene");

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!media.slow_finished.load(Ordering::SeqCst));
        assert_eq!(fx.work_entries(), 0);
    }

    #[tokio::test]
    async fn missing_narration_fails_fit_stage() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::default()), 2);
        let job = fx.scene(0, 5.0);
        std::fs::remove_file(job.narration_source()).unwrap();
        let mut run = PipelineRun::new("c1", "ad.mp4", vec![job]).unwrap();

        let err = pipeline.assemble(&mut run).await.unwrap_err();

        assert_eq!(err.stage(), Some("fit"));
        assert_eq!(fx.work_entries(), 0);
    }

    #[tokio::test]
    async fn missing_video_fails_stage_stage() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::default()), 2);
        let mut run = PipelineRun::new(
            "c1",
            "ad.mp4",
            vec![SceneMediaJob::new(0, PathBuf::from("/nonexistent/clip.mp4"), "/x.mp3")],
        )
        .unwrap();

        let err = pipeline.assemble(&mut run).await.unwrap_err();

        assert_eq!(err.stage(), Some("stage"));
        assert_eq!(err.scene(), Some(0));
    }

    #[tokio::test]
    async fn worker_limit_bounds_concurrency() {
        let fx = Fixture::new();
        let mut media = FakeMedia::default();
        for scene in 0..4 {
            media = media.delayed("strip", scene, Duration::from_millis(20));
        }
        let media = Arc::new(media);
        let pipeline = fx.pipeline(media.clone(), 1);
        let jobs = (0..4).map(|i| fx.scene(i, 3.0)).collect();
        let mut run = PipelineRun::new("c1", "ad.mp4", jobs).unwrap();

        pipeline.assemble(&mut run).await.unwrap();

        assert_eq!(media.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn background_music_is_mixed_into_every_scene() {
        let fx = Fixture::new();
        let music = fx.tmp.path().join("src").join("bed.mp3");
        std::fs::write(&music, "music\n").unwrap();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::default()), 2);
        let mut run = PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0), fx.scene(1, 5.0)])
            .unwrap()
            .with_background_music(&music);

        let output = pipeline.assemble(&mut run).await.unwrap();

        for seg in segments(&output) {
            assert_eq!(value(&seg, "music"), Some("0.2"));
        }
        assert!(music.exists());
    }

    #[tokio::test]
    async fn missing_background_music_fails_before_staging() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::default()), 2);
        let mut run = PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0)])
            .unwrap()
            .with_background_music(fx.tmp.path().join("missing.mp3"));

        let err = pipeline.assemble(&mut run).await.unwrap_err();

        assert_eq!(err.stage(), Some("prepare"));
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(fx.work_entries(), 0);
    }

    #[tokio::test]
    async fn status_updates_only_move_forward() {
        let fx = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let pipeline = fx
            .pipeline(Arc::new(FakeMedia::default()), 2)
            .with_status(StatusSender::new(move |_, status| sink.lock().push(status)));
        let mut run = PipelineRun::new(
            "c1",
            "ad.mp4",
            vec![fx.scene(0, 5.0), fx.scene(1, 5.0), fx.scene(2, 5.0)],
        )
        .unwrap();

        pipeline.assemble(&mut run).await.unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.first(), Some(&RunStatus::Staging));
        assert_eq!(seen.last(), Some(&RunStatus::Completed));
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "not monotonic: {seen:?}");
        assert!(seen.contains(&RunStatus::Concatenating));
        assert!(seen.contains(&RunStatus::Encoding));
    }

    #[tokio::test]
    async fn failed_run_reports_failed_status_last() {
        let fx = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let pipeline = fx
            .pipeline(Arc::new(FakeMedia::failing("fade", 0)), 2)
            .with_status(StatusSender::new(move |_, status| sink.lock().push(status)));
        let mut run = PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0)]).unwrap();

        pipeline.assemble(&mut run).await.unwrap_err();

        assert_eq!(seen.lock().last(), Some(&RunStatus::Failed));
    }

    #[tokio::test]
    async fn only_pending_runs_are_accepted() {
        let fx = Fixture::new();
        let pipeline = fx.pipeline(Arc::new(FakeMedia::default()), 2);
        let mut run = PipelineRun::new("c1", "ad.mp4", vec![fx.scene(0, 5.0)]).unwrap();
        pipeline.assemble(&mut run).await.unwrap();

        let err = pipeline.assemble(&mut run).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(run.status(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn remote_sources_are_downloaded_then_removed() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/renders/scene0.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("scene=0\nduration=4\naudio=original\n"),
            )
            .mount(&server)
            .await;

        let fx = Fixture::new();
        let voice = fx.tmp.path().join("src").join("voice0.mp3");
        std::fs::write(&voice, "voice=0\n").unwrap();
        let url = format!("{}/renders/scene0.mp4", server.uri());
        let pipeline = fx.pipeline(Arc::new(FakeMedia::default()), 2);
        let mut run =
            PipelineRun::new("c1", "ad.mp4", vec![SceneMediaJob::new(0, url, &voice)]).unwrap();

        let output = pipeline.assemble(&mut run).await.unwrap();

        assert_eq!(run.jobs()[0].probed_duration(), Some(4.0));
        assert_eq!(run.jobs()[0].stage_artifacts().len(), 5);
        assert_eq!(value(&segments(&output)[0], "scene"), Some("0"));
        assert_eq!(fx.work_entries(), 0);
    }

    #[test]
    fn settings_reject_zero_workers() {
        let settings = PipelineSettings {
            work_dir: PathBuf::from("/w"),
            output_dir: PathBuf::from("/o"),
            fade_duration: 0.7,
            music_volume: 0.2,
            max_concurrent_jobs: 0,
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_from_config_use_defaults() {
        let settings = PipelineSettings::from_config(&AssemblyConfig::default());
        assert!((settings.fade_duration - 0.7).abs() < 1e-9);
        assert!((settings.music_volume - 0.2).abs() < 1e-6);
        assert!(settings.max_concurrent_jobs >= 1);
    }
}
