//! # Superviseur de worker
//!
//! Un [`Worker`] possède un processus fils et le canal RPC exclusif qui lui
//! est attaché. Le fils est démarré paresseusement au premier appel, jamais
//! relancé spontanément : si un appel le trouve mort, il est relancé à ce
//! moment-là seulement. Sur n'importe quel échec d'appel (trame malformée,
//! lecture tronquée, échec de lancement ou champ de statut applicatif), le
//! fils est détruit de force et son canal jeté, de sorte que l'appel suivant
//! reparte d'un état propre.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, RpcChannel, RpcFields, RpcRequest, STATUS_FIELD};

/// Canal branché sur le stdin/stdout d'un processus fils.
pub type WorkerChannel = RpcChannel<ChildStdout, ChildStdin>;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("executable `{0}` not found in search path")]
    ExecutableNotFound(String),

    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("spawned worker has no stdin pipe")]
    StdinUnavailable,

    #[error("spawned worker has no stdout pipe")]
    StdoutUnavailable,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("worker reported failure for procedure `{0}`")]
    ProcedureFailed(String),
}

/// Description d'un worker : quoi lancer, où le chercher, avec quel
/// environnement.
///
/// Si `command` n'est pas un chemin absolu, il est cherché dans les
/// répertoires de `search_path`, dans l'ordre. Une liste vide laisse le
/// système résoudre la commande via son `PATH` ambiant. Les variables de
/// `env` sont superposées à l'environnement ambiant du daemon, valeurs
/// transmises telles quelles.
#[derive(Debug, Clone, Default)]
pub struct WorkerSpec {
    pub command: String,
    pub args: Vec<String>,
    pub search_path: Vec<PathBuf>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct WorkerState {
    child: Option<Child>,
    channel: Option<WorkerChannel>,
}

impl WorkerState {
    /// Un fils est vivant tant que `try_wait` ne rapporte pas de statut de
    /// sortie et que son canal est encore en place.
    fn is_running(&mut self) -> bool {
        match (self.child.as_mut(), self.channel.as_ref()) {
            (Some(child), Some(_)) => matches!(child.try_wait(), Ok(None)),
            _ => false,
        }
    }

    /// Destruction forcée : canal fermé d'abord (EOF côté fils), puis
    /// SIGKILL. Ne revient jamais en arrière : l'état partiel d'un canal en
    /// échec n'est jamais réutilisé.
    async fn teardown(&mut self) {
        self.channel = None;
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                debug!(error = %err, "worker already gone during teardown");
            }
        }
    }
}

/// Un processus backend et son canal RPC exclusif.
///
/// Toutes les opérations passent par le verrou interne : au plus un appel
/// en vol par worker, l'aller-retour send+receive étant indivisible.
pub struct Worker {
    name: String,
    spec: WorkerSpec,
    state: Mutex<WorkerState>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("command", &self.spec.command)
            .finish()
    }
}

impl Worker {
    pub fn new(name: impl Into<String>, spec: WorkerSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            state: Mutex::new(WorkerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Le fils est-il vivant en ce moment ? Purement informatif : la
    /// réponse peut être périmée dès le retour.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_running()
    }

    /// Arrêt explicite, utilisé à l'extinction du daemon.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.child.is_some() {
            info!(worker = %self.name, "🛑 Stopping worker");
        }
        state.teardown().await;
    }

    fn locate_executable(spec: &WorkerSpec) -> Result<PathBuf, WorkerError> {
        let command = Path::new(&spec.command);
        if command.is_absolute() {
            return Ok(command.to_path_buf());
        }
        if spec.search_path.is_empty() {
            // Résolution laissée au PATH ambiant.
            return Ok(command.to_path_buf());
        }
        for dir in &spec.search_path {
            let candidate = dir.join(command);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(WorkerError::ExecutableNotFound(spec.command.clone()))
    }

    async fn ensure_running(&self, state: &mut WorkerState) -> Result<(), WorkerError> {
        if state.is_running() {
            return Ok(());
        }
        // Un ancien fils mort peut encore traîner ici.
        state.teardown().await;

        let executable = Self::locate_executable(&self.spec)?;
        let mut command = Command::new(&executable);
        command
            .args(&self.spec.args)
            .envs(self.spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| WorkerError::SpawnFailed {
            command: executable.display().to_string(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(WorkerError::StdinUnavailable)?;
        let stdout = child.stdout.take().ok_or(WorkerError::StdoutUnavailable)?;

        state.channel = Some(RpcChannel::new(stdout, stdin));
        state.child = Some(child);
        info!(worker = %self.name, command = %executable.display(), "🚀 Worker started");
        Ok(())
    }
}

/// Invocation de procédures distantes. C'est la seule porte d'entrée du
/// reste du daemon vers un backend ; les tests y branchent leurs mocks.
#[async_trait]
pub trait RpcCaller: Send + Sync + fmt::Debug {
    async fn call(&self, procedure: &str, args: &[(&str, &str)])
    -> Result<RpcFields, WorkerError>;
}

#[async_trait]
impl RpcCaller for Worker {
    /// Un aller-retour complet : démarrage paresseux si besoin, requête
    /// `pmorpc:proc` + arguments, réponse. Pas de délai de garde : un
    /// worker suspendu suspend son appelant, comme documenté dans les notes
    /// de conception.
    async fn call(
        &self,
        procedure: &str,
        args: &[(&str, &str)],
    ) -> Result<RpcFields, WorkerError> {
        let mut state = self.state.lock().await;
        self.ensure_running(&mut state).await?;

        let mut request = RpcRequest::procedure(procedure);
        for (name, value) in args {
            request.push(*name, value.as_bytes());
        }

        debug!(worker = %self.name, procedure = %procedure, "→ RPC call");
        let channel = match state.channel.as_mut() {
            Some(channel) => channel,
            None => return Err(ChannelError::Closed.into()),
        };

        let reply = match channel.roundtrip(&request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(worker = %self.name, procedure = %procedure, error = %err,
                    "💥 RPC channel failure, discarding worker");
                state.teardown().await;
                return Err(err.into());
            }
        };

        if reply.contains(STATUS_FIELD) {
            warn!(worker = %self.name, procedure = %procedure,
                "💥 Worker reported failure, discarding worker");
            state.teardown().await;
            return Err(WorkerError::ProcedureFailed(procedure.to_string()));
        }

        debug!(worker = %self.name, procedure = %procedure, fields = reply.len(), "← RPC reply");
        Ok(reply)
    }
}
