use crate::config::engine::EngineConfig;
use crate::core::attributes::AttributeResolver;
use crate::core::interrupt;
use crate::core::pool::WorkerPool;
use crate::core::schema::{SchemaRegistry, Species};
use crate::core::serializer::Format;
use crate::core::stats::collect_stats;
use crate::core::topology::Topology;
use crate::domain::model::{RunId, RunOutcome, Stats};
use crate::utils::error::{PlatformError, Result};
use crate::utils::validation::{validate_positive_number, Validate};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use std::time::Duration;
use tokio::task::JoinSet;

/// How long the engine gets to exit after SIGTERM before it is killed.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Run ids are unique across every context in the process; they name the
/// per-run working directories.
static NEXT_RUN: AtomicU64 = AtomicU64::new(1);

/// Where rendered documents are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// `<work_root>/<platform>.<format>`
    WorkRoot,
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub formats: Vec<Format>,
    pub output: Option<OutputTarget>,
    pub simulate: bool,
    /// Run on the calling task instead of the worker pool.
    pub wait: bool,
    /// Hide engine stdout/stderr, or send them to `outstream` if set.
    pub silent: bool,
    pub outstream: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            formats: vec![Format::Xml],
            output: Some(OutputTarget::WorkRoot),
            simulate: false,
            wait: true,
            silent: true,
            outstream: None,
        }
    }
}

impl BuildOptions {
    pub fn simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn output(mut self, output: Option<OutputTarget>) -> Self {
        self.output = output;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn outstream(mut self, path: impl Into<PathBuf>) -> Self {
        self.outstream = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub format: Format,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub documents: Vec<RenderedDocument>,
    pub written: Vec<PathBuf>,
    /// Set by a synchronous simulation that produced statistics.
    pub stats: Option<Stats>,
    /// Set when the simulation was queued on the worker pool.
    pub run: Option<RunId>,
}

/// A queued run that has not been collected by [`SimContext::drain_ready`].
#[derive(Debug)]
pub struct RunHandle {
    id: RunId,
    topology: String,
    receiver: oneshot::Receiver<Option<Stats>>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.id
    }

    async fn resolve(self) -> RunOutcome {
        let stats = match self.receiver.await {
            Ok(stats) => stats,
            Err(_) => {
                tracing::warn!("{} ({}) ended without reporting", self.id, self.topology);
                None
            }
        };
        RunOutcome {
            id: self.id,
            topology: self.topology,
            stats,
        }
    }
}

/// Results of the runs taken by one [`SimContext::drain_ready`] call, in
/// the order they finish. Each run is yielded once.
#[derive(Debug)]
pub struct ReadyRuns {
    handles: Vec<RunHandle>,
    running: Option<JoinSet<RunOutcome>>,
}

impl ReadyRuns {
    fn new(handles: Vec<RunHandle>) -> Self {
        Self {
            handles,
            running: None,
        }
    }

    /// Runs not yielded yet.
    pub fn remaining(&self) -> usize {
        self.handles.len() + self.running.as_ref().map_or(0, JoinSet::len)
    }

    pub async fn next(&mut self) -> Option<RunOutcome> {
        let running = self.running.get_or_insert_with(JoinSet::new);
        for handle in self.handles.drain(..) {
            running.spawn(handle.resolve());
        }
        loop {
            match running.join_next().await? {
                Ok(outcome) => return Some(outcome),
                Err(e) => tracing::error!("Failed to collect a run: {}", e),
            }
        }
    }

    pub async fn collect(mut self) -> Vec<RunOutcome> {
        let mut outcomes = Vec::with_capacity(self.remaining());
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Process-scoped state for building and simulating platforms: the engine,
/// the component schema, attribute formulas, the coherence-domain counter,
/// the worker pool and the queue of pending runs.
pub struct SimContext {
    engine: Arc<EngineConfig>,
    schema: SchemaRegistry,
    resolver: AttributeResolver,
    domains: Arc<AtomicU32>,
    pool: Mutex<WorkerPool>,
    pending: Mutex<Vec<RunHandle>>,
}

impl std::fmt::Debug for SimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimContext")
            .field("engine", &self.engine)
            .field("species", &self.schema.len())
            .field("pending", &self.pending_runs())
            .finish()
    }
}

impl SimContext {
    pub fn new(engine: EngineConfig, schema: SchemaRegistry) -> Result<Self> {
        engine.validate()?;
        let pool = WorkerPool::new(engine.max_workers);
        Ok(Self {
            engine: Arc::new(engine),
            schema,
            resolver: AttributeResolver::with_defaults(),
            domains: Arc::new(AtomicU32::new(0)),
            pool: Mutex::new(pool),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Engine from the environment, schema from the engine's manifest.
    pub async fn from_env() -> Result<Self> {
        let engine = EngineConfig::from_env()?;
        let schema = SchemaRegistry::discover(&engine.executable).await?;
        Self::new(engine, schema)
    }

    pub fn with_resolver(mut self, resolver: AttributeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn species(&self, name: &str) -> Result<Arc<Species>> {
        self.schema.get(name)
    }

    pub fn resolver(&self) -> &AttributeResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut AttributeResolver {
        &mut self.resolver
    }

    /// Every platform starts a new coherence domain.
    pub fn new_topology(&self, name: &str) -> Result<Topology> {
        self.new_address_domain();
        Topology::new(name, Arc::clone(&self.domains))
    }

    pub fn new_address_domain(&self) -> u32 {
        self.domains.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replaces the worker pool. Runs already queued on the old pool still
    /// complete.
    pub fn set_max_workers(&self, workers: usize) -> Result<()> {
        validate_positive_number("max_workers", workers, 1)?;
        tracing::debug!("Resizing worker pool to {}", workers);
        *lock(&self.pool) = WorkerPool::new(workers);
        Ok(())
    }

    pub fn max_workers(&self) -> usize {
        lock(&self.pool).workers()
    }

    pub fn pending_runs(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Renders every requested format, writes them if asked, then runs the
    /// first one through the engine if `simulate` is set.
    pub async fn build(&self, topology: &Topology, options: &BuildOptions) -> Result<BuildOutcome> {
        let Some(&primary) = options.formats.first() else {
            return Err(PlatformError::InvalidConfigValueError {
                field: "formats".to_string(),
                value: String::new(),
                reason: "at least one document format is required".to_string(),
            });
        };

        let mut outcome = BuildOutcome::default();
        for &format in &options.formats {
            let text = topology.render(format, &self.resolver)?;
            if let Some(target) = &options.output {
                let path = match target {
                    OutputTarget::WorkRoot => self
                        .engine
                        .work_root
                        .join(format!("{}.{}", topology.name(), format.name())),
                    OutputTarget::Path(path) => path.clone(),
                };
                write_document(&path, &text)?;
                tracing::info!("Wrote {} document to {}", format, path.display());
                outcome.written.push(path);
            }
            outcome.documents.push(RenderedDocument { format, text });
        }

        if !options.simulate {
            return Ok(outcome);
        }

        let job = SimulationJob {
            id: RunId(NEXT_RUN.fetch_add(1, Ordering::Relaxed)),
            topology: topology.name().to_string(),
            format: primary,
            document: outcome.documents[0].text.clone(),
            engine: Arc::clone(&self.engine),
            silent: options.silent,
            outstream: options.outstream.clone(),
        };

        if options.wait {
            let mut guard = interrupt::watch();
            outcome.stats = job.execute(guard.interrupted()).await?;
        } else {
            outcome.run = Some(self.enqueue(job)?);
        }
        Ok(outcome)
    }

    /// Builds and simulates on the calling task. `None` means the engine
    /// reported no statistics.
    pub async fn run(&self, topology: &Topology, options: &BuildOptions) -> Result<Option<Stats>> {
        let options = options.clone().simulate(true).wait(true);
        Ok(self.build(topology, &options).await?.stats)
    }

    /// Builds now and queues the simulation on the worker pool.
    pub async fn submit(&self, topology: &Topology, options: &BuildOptions) -> Result<RunId> {
        let options = options.clone().simulate(true).wait(false);
        self.build(topology, &options)
            .await?
            .run
            .ok_or_else(|| PlatformError::ExecutionFailure {
                message: "simulation was not queued".to_string(),
            })
    }

    /// Takes every pending run out of the queue. Runs submitted afterwards
    /// belong to the next drain.
    pub fn drain_ready(&self) -> ReadyRuns {
        let handles = std::mem::take(&mut *lock(&self.pending));
        tracing::debug!("Draining {} pending runs", handles.len());
        ReadyRuns::new(handles)
    }

    fn enqueue(&self, job: SimulationJob) -> Result<RunId> {
        let id = job.id;
        let topology = job.topology.clone();
        let (sender, receiver) = oneshot::channel();

        lock(&self.pool).submit(Box::pin(async move {
            let stats = match job.execute(std::future::pending()).await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::error!("{} failed: {}", id, e);
                    None
                }
            };
            let _ = sender.send(stats);
        }))?;

        tracing::info!("Queued {} for platform '{}'", id, topology);
        lock(&self.pending).push(RunHandle {
            id,
            topology,
            receiver,
        });
        Ok(id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_document(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

struct SimulationJob {
    id: RunId,
    topology: String,
    format: Format,
    document: String,
    engine: Arc<EngineConfig>,
    silent: bool,
    outstream: Option<PathBuf>,
}

impl SimulationJob {
    /// Runs the engine in a fresh working directory and parses its logs.
    /// A missing or unstartable engine yields `Ok(None)`.
    async fn execute<F>(self, interrupt: F) -> Result<Option<Stats>>
    where
        F: Future<Output = ()>,
    {
        let workdir = self.prepare_workdir()?;
        let document_name = format!("tmp.{}", self.format.name());
        std::fs::write(workdir.join(&document_name), &self.document)?;

        let mut command = Command::new(&self.engine.executable);
        command
            .arg("--run")
            .arg(&document_name)
            .current_dir(&workdir);
        self.configure_output(&mut command)?;

        tracing::info!("{}: starting engine in {}", self.id, workdir.display());
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let failure = PlatformError::ExecutionFailure {
                    message: format!("cannot start {}: {}", self.engine.executable.display(), e),
                };
                tracing::error!("{}: {}", self.id, failure);
                return Ok(None);
            }
        };

        wait_or_interrupt(child, interrupt).await?;

        let stats = collect_stats(&workdir)?;
        if stats.is_empty() {
            tracing::warn!("{}: engine reported no statistics", self.id);
            Ok(None)
        } else {
            tracing::info!("{}: collected {} metrics", self.id, stats.metric_count());
            Ok(Some(stats))
        }
    }

    /// `.<platform><timestamp>--<thread>-<run>` under the work root. The
    /// directory must not exist yet.
    fn prepare_workdir(&self) -> Result<PathBuf> {
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
        let thread: String = format!("{:?}", std::thread::current().id())
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        let dir = self.engine.work_root.join(format!(
            ".{}{}--{}-{}",
            self.topology, timestamp, thread, self.id.0
        ));
        std::fs::create_dir_all(&self.engine.work_root)?;
        std::fs::create_dir(&dir)?;
        Ok(dir)
    }

    fn configure_output(&self, command: &mut Command) -> Result<()> {
        if !self.silent {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            return Ok(());
        }
        match &self.outstream {
            Some(path) => {
                let file = std::fs::File::create(path)?;
                let err = file.try_clone()?;
                command.stdout(Stdio::from(file)).stderr(Stdio::from(err));
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        Ok(())
    }
}

/// Waits for the engine to exit. If `interrupt` fires first the engine is
/// terminated and reaped before `Interrupted` is returned. The exit status
/// is only logged.
async fn wait_or_interrupt<F>(mut child: Child, interrupt: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::debug!("Engine exited with {}", status),
                Err(e) => tracing::warn!("Failed to wait for engine: {}", e),
            }
            Ok(())
        }
        _ = interrupt => {
            tracing::warn!("Forwarding termination to engine (pid {:?})", child.id());
            terminate(&mut child, TERMINATION_GRACE).await;
            Err(PlatformError::Interrupted)
        }
    }
}

/// SIGTERM, then SIGKILL if the engine is still running after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let sent = Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match sent {
                Ok(status) if status.success() => {
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(status) => {
                            tracing::debug!("Engine stopped after SIGTERM: {:?}", status);
                            return;
                        }
                        Err(_) => tracing::warn!("Engine still running {:?} after SIGTERM, killing it", grace),
                    }
                }
                Ok(status) => tracing::warn!("kill -TERM {} exited with {}", pid, status),
                Err(e) => tracing::warn!("Could not run kill -TERM {}: {}", pid, e),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.start_kill() {
        tracing::warn!("Could not signal engine: {}", e);
    }
    let _ = child.wait().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("engine.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_interrupt_kills_engine() {
        let dir = TempDir::new().unwrap();
        let engine = script(dir.path(), "sleep 30");
        let child = Command::new(&engine).spawn().unwrap();

        let started = Instant::now();
        let result = wait_or_interrupt(child, tokio::time::sleep(Duration::from_millis(50))).await;

        assert!(matches!(result, Err(PlatformError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_interrupt_lets_engine_clean_up() {
        let dir = TempDir::new().unwrap();
        let engine = script(
            dir.path(),
            "trap 'echo flushed > final.log; exit 0' TERM\nsleep 30 &\nwait",
        );
        let child = Command::new(&engine).current_dir(dir.path()).spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = wait_or_interrupt(child, std::future::ready(())).await;

        assert!(matches!(result, Err(PlatformError::Interrupted)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("final.log")).unwrap(),
            "flushed\n"
        );
    }

    #[tokio::test]
    async fn test_engine_ignoring_sigterm_is_killed() {
        let dir = TempDir::new().unwrap();
        let engine = script(dir.path(), "trap '' TERM\nsleep 30 &\nwait");
        let mut child = Command::new(&engine).spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        terminate(&mut child, Duration::from_millis(300)).await;

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_job_writes_document_in_isolated_directory() {
        let dir = TempDir::new().unwrap();
        let engine = script(
            dir.path(),
            "cp \"$2\" seen.xml\necho \"[Stats] (cpu0) cycles 12 cyc\" > run.log",
        );
        let config = Arc::new(EngineConfig::new(&engine).with_work_root(dir.path().join("runs")));

        let job = SimulationJob {
            id: RunId(7),
            topology: "soc".to_string(),
            format: Format::Xml,
            document: "<vpsim/>\n".to_string(),
            engine: config,
            silent: true,
            outstream: None,
        };
        let stats = job.execute(std::future::pending()).await.unwrap().unwrap();
        assert_eq!(stats.get("cpu0", "cycles").unwrap().value, 12.0);

        let runs: Vec<_> = std::fs::read_dir(dir.path().join("runs"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(runs.len(), 1);
        let name = runs[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".soc"));
        assert!(name.ends_with("-7"));
        assert_eq!(
            std::fs::read_to_string(runs[0].join("seen.xml")).unwrap(),
            "<vpsim/>\n"
        );
    }

    #[tokio::test]
    async fn test_outstream_captures_engine_output() {
        let dir = TempDir::new().unwrap();
        let engine = script(dir.path(), "echo hello from engine");
        let out = dir.path().join("engine.out");

        let job = SimulationJob {
            id: RunId(1),
            topology: "soc".to_string(),
            format: Format::Xml,
            document: String::new(),
            engine: Arc::new(EngineConfig::new(&engine).with_work_root(dir.path())),
            silent: true,
            outstream: Some(out.clone()),
        };
        assert!(job.execute(std::future::pending()).await.unwrap().is_none());
        assert!(std::fs::read_to_string(&out)
            .unwrap()
            .contains("hello from engine"));
    }
}
