use super::process_tree::{self, Delivery, TreeSignal};
use crate::model::RunRequest;
use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

type Reader = JoinHandle<io::Result<Vec<u8>>>;

/// A spawned simulation child with its output pipes being drained.
pub(crate) struct SimulationProcess {
    child: Child,
    pid: Option<u32>,
    stdout: Option<Reader>,
    stderr: Option<Reader>,
}

impl SimulationProcess {
    /// Launch `<executable> <input_file> <weather_file>` in its own process group.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(request: &RunRequest) -> io::Result<Self> {
        let mut cmd = std::process::Command::new(&request.executable);
        cmd.arg(&request.input_file)
            .arg(&request.weather_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = request.working_dir.as_deref() {
            cmd.current_dir(dir);
        }
        process_tree::isolate_group(&mut cmd);

        tracing::debug!(
            "Running: {} {} {}",
            request.executable.display(),
            request.input_file.display(),
            request.weather_file.display()
        );

        let mut child = tokio::process::Command::from(cmd).spawn()?;
        let pid = child.id();
        // Drain both pipes concurrently so a chatty child never blocks on a full pipe.
        let stdout = child.stdout.take().map(|out| tokio::spawn(read_all(out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_all(err)));

        Ok(Self {
            child,
            pid,
            stdout,
            stderr,
        })
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the group leader to exit. Cancel-safe.
    pub(crate) async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Whether the leader has already exited, without blocking.
    pub(crate) fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Signal the whole process group.
    pub(crate) fn signal(
        &self,
        signal: TreeSignal,
    ) -> impl std::future::Future<Output = io::Result<Delivery>> + Send + 'static {
        let pid = self.pid;
        async move {
            match pid {
                Some(pid) => process_tree::signal_tree(pid, signal).await,
                None => Ok(Delivery::AlreadyExited),
            }
        }
    }

    /// Hand over the pipe readers; the returned future resolves once both
    /// pipes hit EOF.
    pub(crate) fn take_output(
        &mut self,
    ) -> impl std::future::Future<Output = (Vec<u8>, Vec<u8>)> + Send + 'static {
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();
        async move {
            tokio::join!(
                join_reader(stdout, "stdout"),
                join_reader(stderr, "stderr")
            )
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn join_reader(reader: Option<Reader>, stream: &'static str) -> Vec<u8> {
    let Some(reader) = reader else {
        return Vec::new();
    };
    match reader.await {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            tracing::warn!("failed to read simulation {}: {}", stream, e);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("{} reader task failed: {}", stream, e);
            Vec::new()
        }
    }
}
