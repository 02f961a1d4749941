use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh_keys::key;

use aiops_persistence::models::ServerCredential;
use aiops_types::AuthType;

use crate::executor::{elevate_command, CommandResult, Executor, ExecutorError, Session};

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        self,
        _server_public_key: &key::PublicKey,
    ) -> Result<(Self, bool), Self::Error> {
        // Host key pinning is a deployment concern (known_hosts, CA-signed
        // keys); this driver accepts whatever key the target presents.
        Ok((self, true))
    }
}

pub struct SshExecutor {
    secret_resolver: Arc<dyn Fn(&ServerCredential) -> String + Send + Sync>,
}

impl SshExecutor {
    /// `secret_resolver` turns `secret_material_encrypted` into the key or
    /// password to present; decryption happens here and nowhere else
    /// (spec.md §3: "secret material is only decrypted inside executor
    /// drivers, never returned over API").
    pub fn new(secret_resolver: Arc<dyn Fn(&ServerCredential) -> String + Send + Sync>) -> Self {
        Self { secret_resolver }
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn connect(&self, server: &ServerCredential) -> Result<Box<dyn Session>, ExecutorError> {
        let config = Arc::new(client::Config::default());
        let addr = (server.hostname.as_str(), server.port as u16);
        let mut handle = client::connect(config, addr, ClientHandler)
            .await
            .map_err(|_| ExecutorError::Unreachable)?;

        let secret = (self.secret_resolver)(server);
        let authenticated = match server.auth_type {
            AuthType::Key => {
                let key_pair = russh_keys::decode_secret_key(&secret, None)
                    .map_err(|_| ExecutorError::AuthFailed)?;
                handle
                    .authenticate_publickey(&server.username, Arc::new(key_pair))
                    .await
                    .map_err(|_| ExecutorError::AuthFailed)?
            }
            AuthType::Password => handle
                .authenticate_password(&server.username, &secret)
                .await
                .map_err(|_| ExecutorError::AuthFailed)?,
            _ => return Err(ExecutorError::AuthFailed),
        };

        if !authenticated {
            return Err(ExecutorError::AuthFailed);
        }

        Ok(Box::new(SshSession { handle }))
    }
}

pub struct SshSession {
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl Session for SshSession {
    async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        elevate: bool,
    ) -> Result<CommandResult, ExecutorError> {
        let command = elevate_command(command, elevate);
        let started = std::time::Instant::now();

        let attempt = tokio::time::timeout(timeout, self.exec(&command));
        match attempt.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(CommandResult::timed_out(started.elapsed().as_millis() as i64)),
        }
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .map_err(|err| ExecutorError::Protocol(err.to_string()))
    }
}

impl SshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandResult, ExecutorError> {
        let started = std::time::Instant::now();
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|err| ExecutorError::Protocol(err.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|err| ExecutorError::Protocol(err.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0i32;

        loop {
            let Some(msg) = channel.wait().await else { break };
            match msg {
                russh::ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                russh::ChannelMsg::ExtendedData { data, .. } => stderr.extend_from_slice(&data),
                russh::ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status as i32,
                russh::ChannelMsg::Eof | russh::ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(CommandResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}
