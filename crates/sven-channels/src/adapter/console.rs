// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Console transport: reads lines from stdin, writes replies to stdout.
//!
//! The spec's CLI surface (slash commands, `/quit`, etc.) lives in the
//! interactive frontend; this adapter only owns the transport contract —
//! turning a stdin line into a [`MessageContext`] and a reply back into a
//! printed line.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use crate::message::{ChatType, MessageContext};
use crate::router::{Adapter, IngressRouter};

const CHANNEL: &str = "console";
/// Single-user console session: every line belongs to the same chat.
const CHAT_ID: &str = "local";

pub struct ConsoleAdapter {
    router: std::sync::Mutex<Option<Arc<IngressRouter>>>,
    running: Arc<AtomicBool>,
    read_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            router: std::sync::Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            read_loop: std::sync::Mutex::new(None),
        })
    }

    pub fn attach_router(&self, router: Arc<IngressRouter>) {
        *self.router.lock().unwrap() = Some(router);
    }
}

#[async_trait]
impl Adapter for ConsoleAdapter {
    fn channel(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, _chat_id: &str, text: &str) -> anyhow::Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let Some(router) = self.router.lock().unwrap().clone() else {
            anyhow::bail!("ConsoleAdapter started without a router attached");
        };
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let mut reader = BufReader::new(stdin);
            let mut line = String::new();
            while running.load(Ordering::SeqCst) {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let text = line.trim_end_matches(['\n', '\r']).to_string();
                        if text.is_empty() {
                            continue;
                        }
                        router.on_message(MessageContext {
                            channel: CHANNEL.into(),
                            chat_type: ChatType::Direct,
                            chat_id: CHAT_ID.into(),
                            user_id: "local".into(),
                            user_name: None,
                            message_id: None,
                            text,
                            reply_to: None,
                            timestamp: now_ms(),
                            mentioned: true,
                        });
                    }
                    Err(_) => break,
                }
            }
        });
        *self.read_loop.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.read_loop.lock().unwrap().take() {
            handle.abort();
        }
        Ok(())
    }
}

impl ConsoleAdapter {
    /// Block until the stdin read loop hits EOF (or is stopped). Used by the
    /// `serve` entry point so the process exits cleanly once stdin is closed
    /// (e.g. the interactive console is piped a finite script) instead of
    /// hanging forever.
    pub async fn join(&self) {
        let handle = self.read_loop.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
