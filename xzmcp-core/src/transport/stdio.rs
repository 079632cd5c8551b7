//! Subprocess-backed transport: one JSON-RPC message per line on the
//! child's stdin/stdout, the convention local MCP servers speak.

use super::{Transport, TransportHealth};
use crate::error::{XzError, XzResult};
use crate::protocol::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl StdioTransport {
    pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>, timeout: Duration) -> Self {
        Self { command, args, env, timeout, child: None, stdin: None, stdout: None }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> XzResult<()> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| XzError::transport(format!("spawn '{}': {e}", self.command)))?;
        let stdin = child.stdin.take().ok_or_else(|| XzError::transport("child has no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| XzError::transport("child has no stdout"))?;
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        Ok(())
    }

    async fn send(&mut self, request: JsonRpcRequest) -> XzResult<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| XzError::transport("not connected"))?;
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        tokio::time::timeout(self.timeout, stdin.write_all(&line))
            .await
            .map_err(|_| XzError::ConnectionTimeout { timeout: self.timeout })??;
        Ok(())
    }

    async fn receive(&mut self) -> XzResult<JsonRpcResponse> {
        let stdout = self.stdout.as_mut().ok_or_else(|| XzError::transport("not connected"))?;
        let mut line = String::new();
        let n = tokio::time::timeout(self.timeout, stdout.read_line(&mut line))
            .await
            .map_err(|_| XzError::ConnectionTimeout { timeout: self.timeout })??;
        if n == 0 {
            return Err(XzError::transport("child process closed stdout"));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    fn is_connected(&self) -> bool {
        self.child.is_some()
    }

    async fn health(&self) -> TransportHealth {
        match &self.child {
            Some(child) => match child.id() {
                Some(_) => TransportHealth::Healthy,
                None => TransportHealth::Unhealthy,
            },
            None => TransportHealth::Unhealthy,
        }
    }

    async fn close(&mut self) -> XzResult<()> {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }
}
