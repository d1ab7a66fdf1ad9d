// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Approval Engine (spec.md §4.2): decides whether a user-originated shell
//! command should run, be asked about, or be denied.
//!
//! Generalizes the earlier `ToolPolicy` glob matcher (kept in [`crate::policy`]
//! for per-tool default approval tiers) into the full segmented-command
//! algorithm: quote/escape-aware parsing, a safe-bins fast path, an
//! id-addressable allowlist, and the `security × ask` policy matrix.
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Final per-segment / whole-command decision. Ordered `Allow < Ask < Deny`
/// so that `max()` over segment decisions gives the most restrictive result
/// (spec.md §4.2 step 2, §8 property 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Ask,
    Deny,
}

/// Overall security posture (spec.md §4.2 `ApprovalPolicy.security`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Deny everything not on the safe-bins list or allowlist.
    Deny,
    /// Allow safe bins and allowlist matches; everything else is gated by `ask`.
    Allowlist,
    /// Allow everything.
    Full,
}

/// When to prompt for interactive confirmation (spec.md §4.2 `ApprovalPolicy.ask`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskMode {
    Off,
    OnMiss,
    Always,
}

/// The configured policy (spec.md §3 `ApprovalPolicy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    pub security: SecurityLevel,
    pub ask: AskMode,
    /// Decision to apply when `ask` would fire but no interactive channel
    /// can service it (spec.md §9 doesn't name this case explicitly; this
    /// crate's callers — transports with no synchronous confirmation path —
    /// resolve `Ask` deterministically via this field rather than blocking).
    pub ask_fallback: SecurityLevel,
    /// Built-in skill tools bypass shell gating entirely when true.
    pub auto_allow_skills: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            security: SecurityLevel::Allowlist,
            ask: AskMode::OnMiss,
            ask_fallback: SecurityLevel::Deny,
            auto_allow_skills: false,
        }
    }
}

/// A single allowlist pattern (spec.md §3 `AllowlistEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub id: String,
    /// Glob pattern (`*` = any run of chars, `?` = one char), anchored to the
    /// full textual form of a command segment.
    pub pattern: String,
    pub description: Option<String>,
    pub created_at_ms: i64,
}

/// One parsed shell segment (spec.md §3 `CommandAnalysis`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub binary: String,
    pub args: Vec<String>,
    /// Full reconstructed textual form (binary + args), used for allowlist
    /// matching — matching is "anchored to whole command strings" per the
    /// GLOSSARY, which we interpret per-segment (spec.md §4.2 step 3).
    pub text: String,
}

/// Stateless parse of a command string into its pipe/connective-separated
/// segments (spec.md §3 `CommandAnalysis`, §4.2 step 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAnalysis {
    pub segments: Vec<Segment>,
}

/// The engine's verdict for a whole command (spec.md §4.2 `ApprovalResult`).
#[derive(Debug, Clone)]
pub struct ApprovalResult {
    pub decision: Decision,
    pub reason: String,
    pub matched_entries: Vec<AllowlistEntry>,
    pub analysis: CommandAnalysis,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("allowlist pattern must not be empty")]
    InvalidPattern,
    #[error("config is not valid JSON or is missing required fields: {0}")]
    InvalidConfig(String),
}

/// Binaries considered safe regardless of policy (spec.md §4.2 step 3 "safe
/// bins set"). Deliberately read-only, non-destructive commands.
fn default_safe_bins() -> Vec<String> {
    [
        "ls", "cat", "pwd", "echo", "true", "false", "date", "whoami", "uname", "which",
        "head", "tail", "wc", "file", "env", "id",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Split `input` on unquoted `|`, `&&`, `||`, `;`, honoring single/double
/// quotes and backslash escapes (spec.md §4.2 step 1).
fn split_segments(input: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        if c == '\\' && !in_single {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
            continue;
        }
        if c == '\'' && !in_double {
            in_single = !in_single;
            current.push(c);
            continue;
        }
        if c == '"' && !in_single {
            in_double = !in_double;
            current.push(c);
            continue;
        }
        if in_single || in_double {
            current.push(c);
            continue;
        }
        match c {
            '|' => {
                // `||` is one connective; a lone `|` is a pipe. Either way it
                // separates segments the same way.
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            '&' if chars.peek() == Some(&'&') => {
                chars.next();
                segments.push(std::mem::take(&mut current));
            }
            ';' => {
                segments.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    } else if segments.is_empty() {
        segments.push(current);
    }
    segments
}

/// Tokenize one segment into (binary, args), honoring quotes/escapes and
/// resolving a leading `~` to the user home (spec.md §4.2 step 1).
fn tokenize_segment(raw: &str) -> Segment {
    let trimmed = raw.trim();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = trimmed.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        if c == '\\' && !in_single {
            if let Some(next) = chars.next() {
                current.push(next);
            }
            continue;
        }
        if c == '\'' && !in_double {
            in_single = !in_single;
            continue;
        }
        if c == '"' && !in_single {
            in_double = !in_double;
            continue;
        }
        if c.is_whitespace() && !in_single && !in_double {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    let tokens: Vec<String> = tokens
        .into_iter()
        .map(|t| {
            if let Some(rest) = t.strip_prefix('~') {
                if rest.is_empty() || rest.starts_with('/') {
                    return shellexpand::tilde(&t).into_owned();
                }
            }
            t
        })
        .collect();

    let binary = tokens.first().cloned().unwrap_or_default();
    let args = tokens.iter().skip(1).cloned().collect();
    Segment { binary, args, text: tokens.join(" ") }
}

/// Parse `input` into segments (spec.md §4.2 step 1).
pub fn parse_command(input: &str) -> CommandAnalysis {
    let segments = split_segments(input)
        .into_iter()
        .map(|raw| tokenize_segment(&raw))
        .filter(|s| !s.binary.is_empty())
        .collect();
    CommandAnalysis { segments }
}

/// Anchor-match `pattern` (`*`/`?` glob) against `text` end-to-end (GLOSSARY
/// "Allowlist pattern").
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('*') => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            Some('?') => !t.is_empty() && inner(&p[1..], &t[1..]),
            Some(pc) => t.first() == Some(pc) && inner(&p[1..], &t[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    inner(&p, &t)
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

struct Inner {
    allowlist: Vec<AllowlistEntry>,
    safe_bins: Vec<String>,
    config: ApprovalConfig,
}

/// The engine: owns the allowlist, safe-bins set, and policy; stateless
/// `decide` calls never mutate it (spec.md §4.2 "stateless function of
/// input text" for `CommandAnalysis`; the engine adds the configured state
/// around that pure parse).
pub struct ApprovalEngine {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
    /// Optional on-disk location for `export_config`/`import_config`
    /// round-tripping (spec.md §6 `.approval/{allowlist.json, policy.json,
    /// safebins.json}`). `None` keeps the engine purely in-memory (tests).
    pub workspace_dir: Option<PathBuf>,
}

impl ApprovalEngine {
    pub fn new(config: ApprovalConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                allowlist: Vec::new(),
                safe_bins: default_safe_bins(),
                config,
            }),
            next_id: AtomicU64::new(1),
            workspace_dir: None,
        }
    }

    pub fn with_workspace(config: ApprovalConfig, workspace_dir: PathBuf) -> Self {
        let mut engine = Self::new(config);
        engine.workspace_dir = Some(workspace_dir);
        engine
    }

    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("al-{n}")
    }

    /// Whether `name` (a parsed tool call, not a shell segment) is a
    /// built-in skill tool rather than a shell invocation — callers pass
    /// this through so `auto_allow_skills` can short-circuit (spec.md §4.2
    /// step 3).
    pub fn is_skill_shortcut(&self, is_skill_tool: bool) -> Option<Decision> {
        let inner = self.inner.read().unwrap();
        if inner.config.auto_allow_skills && is_skill_tool {
            Some(Decision::Allow)
        } else {
            None
        }
    }

    fn decide_segment(&self, inner: &Inner, seg: &Segment) -> (Decision, String, Vec<AllowlistEntry>) {
        let base = basename(&seg.binary);
        if inner.safe_bins.iter().any(|b| b == base) {
            return (Decision::Allow, format!("'{base}' is a safe bin"), vec![]);
        }

        let matches: Vec<AllowlistEntry> = inner
            .allowlist
            .iter()
            .filter(|e| glob_match(&e.pattern, &seg.text))
            .cloned()
            .collect();
        if !matches.is_empty() {
            return (
                Decision::Allow,
                format!("matched allowlist pattern '{}'", matches[0].pattern),
                matches,
            );
        }

        let decision = match inner.config.security {
            SecurityLevel::Full => Decision::Allow,
            SecurityLevel::Deny => Decision::Deny,
            SecurityLevel::Allowlist => match inner.config.ask {
                AskMode::Off => Decision::Deny,
                AskMode::OnMiss | AskMode::Always => Decision::Ask,
            },
        };
        let reason = match decision {
            Decision::Allow => "security=full".to_string(),
            Decision::Deny => "no allowlist match, ask=off".to_string(),
            Decision::Ask => "no allowlist match, user confirmation required".to_string(),
        };
        (decision, reason, vec![])
    }

    /// Decide the whole-command verdict (spec.md §4.2 steps 2-4).
    pub fn decide(&self, command: &str) -> ApprovalResult {
        let analysis = parse_command(command);
        let inner = self.inner.read().unwrap();

        if analysis.segments.is_empty() {
            return ApprovalResult {
                decision: Decision::Deny,
                reason: "empty command".into(),
                matched_entries: vec![],
                analysis,
            };
        }

        let mut worst = Decision::Allow;
        let mut reason = String::new();
        let mut matched = Vec::new();
        for seg in &analysis.segments {
            let (d, r, m) = self.decide_segment(&inner, seg);
            // `ask == always` forces at least `Ask` even on an allow match
            // (spec.md §4.2 step 4 tie-break).
            let d = if d == Decision::Allow
                && matches!(inner.config.security, SecurityLevel::Allowlist)
                && matches!(inner.config.ask, AskMode::Always)
                && !m.is_empty()
            {
                Decision::Ask
            } else {
                d
            };
            if d > worst {
                worst = d;
                reason = r;
                matched = m;
            } else if matched.is_empty() && !m.is_empty() {
                matched = m;
            }
        }

        ApprovalResult { decision: worst, reason, matched_entries: matched, analysis }
    }

    /// Resolve an `Ask` decision into a deterministic allow/deny for
    /// contexts with no synchronous confirmation channel, per
    /// `ApprovalConfig.ask_fallback`.
    pub fn resolve_ask_fallback(&self) -> Decision {
        match self.inner.read().unwrap().config.ask_fallback {
            SecurityLevel::Full => Decision::Allow,
            SecurityLevel::Deny => Decision::Deny,
            SecurityLevel::Allowlist => Decision::Ask,
        }
    }

    // ── CRUD ──────────────────────────────────────────────────────────────

    pub fn add_allowlist(&self, pattern: &str, description: Option<String>) -> Result<AllowlistEntry, ApprovalError> {
        if pattern.trim().is_empty() {
            return Err(ApprovalError::InvalidPattern);
        }
        let entry = AllowlistEntry {
            id: self.fresh_id(),
            pattern: pattern.to_string(),
            description,
            created_at_ms: now_ms(),
        };
        self.inner.write().unwrap().allowlist.push(entry.clone());
        Ok(entry)
    }

    /// Remove by id or by exact pattern text. Returns `false` (not an
    /// error) when nothing matched (spec.md §4.2 "Failure semantics").
    pub fn remove_allowlist(&self, id_or_pattern: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let before = inner.allowlist.len();
        inner
            .allowlist
            .retain(|e| e.id != id_or_pattern && e.pattern != id_or_pattern);
        inner.allowlist.len() != before
    }

    pub fn update_allowlist(
        &self,
        id: &str,
        pattern: Option<String>,
        description: Option<Option<String>>,
    ) -> Option<AllowlistEntry> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner.allowlist.iter_mut().find(|e| e.id == id)?;
        if let Some(p) = pattern {
            entry.pattern = p;
        }
        if let Some(d) = description {
            entry.description = d;
        }
        Some(entry.clone())
    }

    pub fn get_allowlist(&self) -> Vec<AllowlistEntry> {
        self.inner.read().unwrap().allowlist.clone()
    }

    pub fn add_safe_bin(&self, bin: &str) {
        let mut inner = self.inner.write().unwrap();
        if !inner.safe_bins.iter().any(|b| b == bin) {
            inner.safe_bins.push(bin.to_string());
        }
    }

    pub fn remove_safe_bin(&self, bin: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let before = inner.safe_bins.len();
        inner.safe_bins.retain(|b| b != bin);
        inner.safe_bins.len() != before
    }

    pub fn safe_bins(&self) -> Vec<String> {
        self.inner.read().unwrap().safe_bins.clone()
    }

    pub fn policy(&self) -> ApprovalConfig {
        self.inner.read().unwrap().config.clone()
    }

    pub fn set_policy(&self, patch: PolicyPatch) {
        let mut inner = self.inner.write().unwrap();
        if let Some(s) = patch.security {
            inner.config.security = s;
        }
        if let Some(a) = patch.ask {
            inner.config.ask = a;
        }
        if let Some(af) = patch.ask_fallback {
            inner.config.ask_fallback = af;
        }
        if let Some(aas) = patch.auto_allow_skills {
            inner.config.auto_allow_skills = aas;
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.allowlist.clear();
        inner.safe_bins = default_safe_bins();
        inner.config = ApprovalConfig::default();
    }

    /// JSON round-trippable export of the engine's full observable state
    /// (spec.md §4.2, §8 property 7).
    pub fn export_config(&self) -> ExportedConfig {
        let inner = self.inner.read().unwrap();
        ExportedConfig {
            allowlist: inner.allowlist.clone(),
            safe_bins: inner.safe_bins.clone(),
            config: inner.config.clone(),
        }
    }

    pub fn import_config(&self, json: &str) -> Result<(), ApprovalError> {
        let parsed: ExportedConfig =
            serde_json::from_str(json).map_err(|e| ApprovalError::InvalidConfig(e.to_string()))?;
        let mut inner = self.inner.write().unwrap();
        inner.allowlist = parsed.allowlist;
        inner.safe_bins = parsed.safe_bins;
        inner.config = parsed.config;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyPatch {
    pub security: Option<SecurityLevel>,
    pub ask: Option<AskMode>,
    pub ask_fallback: Option<SecurityLevel>,
    pub auto_allow_skills: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedConfig {
    pub allowlist: Vec<AllowlistEntry>,
    pub safe_bins: Vec<String>,
    pub config: ApprovalConfig,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ask_on_miss_engine() -> ApprovalEngine {
        ApprovalEngine::new(ApprovalConfig {
            security: SecurityLevel::Allowlist,
            ask: AskMode::OnMiss,
            ask_fallback: SecurityLevel::Deny,
            auto_allow_skills: false,
        })
    }

    // ── Parsing ───────────────────────────────────────────────────────────

    #[test]
    fn splits_on_pipes_and_connectives() {
        let a = parse_command("ls -la | grep foo && echo done; echo end");
        assert_eq!(a.segments.len(), 4);
        assert_eq!(a.segments[0].binary, "ls");
        assert_eq!(a.segments[1].binary, "grep");
        assert_eq!(a.segments[2].binary, "echo");
        assert_eq!(a.segments[3].binary, "echo");
    }

    #[test]
    fn quoted_pipe_is_not_a_separator() {
        let a = parse_command("echo 'a|b'");
        assert_eq!(a.segments.len(), 1);
        assert_eq!(a.segments[0].args, vec!["a|b"]);
    }

    #[test]
    fn double_quotes_and_escapes_preserved() {
        let a = parse_command(r#"echo "hello world" foo\ bar"#);
        assert_eq!(a.segments[0].args, vec!["hello world", "foo bar"]);
    }

    #[test]
    fn tilde_expands_to_home() {
        let a = parse_command("ls ~/projects");
        let home = shellexpand::tilde("~").into_owned();
        assert!(a.segments[0].args[0].starts_with(&home));
    }

    // ── Glob matching ─────────────────────────────────────────────────────

    #[test]
    fn glob_star_matches_any_run() {
        assert!(glob_match("/bin/ls *", "/bin/ls -la /tmp"));
        assert!(!glob_match("/bin/ls *", "/bin/rm -rf /tmp"));
    }

    #[test]
    fn glob_question_matches_one_char() {
        assert!(glob_match("ls ?", "ls a"));
        assert!(!glob_match("ls ?", "ls ab"));
    }

    #[test]
    fn glob_is_anchored_end_to_end() {
        assert!(!glob_match("ls", "ls -la"));
        assert!(glob_match("ls*", "ls -la"));
    }

    // ── Safe bins ─────────────────────────────────────────────────────────

    #[test]
    fn safe_bin_always_allowed_regardless_of_policy() {
        let engine = ApprovalEngine::new(ApprovalConfig {
            security: SecurityLevel::Deny,
            ask: AskMode::Off,
            ask_fallback: SecurityLevel::Deny,
            auto_allow_skills: false,
        });
        let r = engine.decide("ls -la /tmp");
        assert_eq!(r.decision, Decision::Allow);
    }

    // ── Policy matrix (spec.md §4.2 step 3) ───────────────────────────────

    #[test]
    fn security_full_allows_everything() {
        let engine = ApprovalEngine::new(ApprovalConfig {
            security: SecurityLevel::Full,
            ask: AskMode::Off,
            ask_fallback: SecurityLevel::Deny,
            auto_allow_skills: false,
        });
        assert_eq!(engine.decide("rm -rf /tmp/x").decision, Decision::Allow);
    }

    #[test]
    fn security_deny_denies_everything_not_safe_or_allowlisted() {
        let engine = ApprovalEngine::new(ApprovalConfig {
            security: SecurityLevel::Deny,
            ask: AskMode::Always,
            ask_fallback: SecurityLevel::Deny,
            auto_allow_skills: false,
        });
        assert_eq!(engine.decide("rm -rf /tmp/x").decision, Decision::Deny);
    }

    #[test]
    fn allowlist_with_ask_off_denies_on_miss() {
        let engine = ApprovalEngine::new(ApprovalConfig {
            security: SecurityLevel::Allowlist,
            ask: AskMode::Off,
            ask_fallback: SecurityLevel::Deny,
            auto_allow_skills: false,
        });
        assert_eq!(engine.decide("rm -rf /tmp/x").decision, Decision::Deny);
    }

    #[test]
    fn allowlist_with_ask_on_miss_asks_on_miss() {
        let engine = ask_on_miss_engine();
        assert_eq!(engine.decide("rm -rf /tmp/x").decision, Decision::Ask);
    }

    // ── S2 scenario from spec.md §8 ────────────────────────────────────────

    #[test]
    fn s2_shell_approval_scenario() {
        let engine = ask_on_miss_engine();
        engine.add_allowlist("/bin/ls *", None).unwrap();
        assert_eq!(engine.decide("ls -la /tmp").decision, Decision::Allow);
        assert_eq!(engine.decide("rm -rf /tmp/x").decision, Decision::Ask);
    }

    // ── Tie-break: most restrictive segment wins (spec.md §8 property 6) ──

    #[test]
    fn most_restrictive_segment_wins() {
        let engine = ask_on_miss_engine();
        engine.add_allowlist("ls *", None).unwrap();
        // First segment allowed (allowlisted), second asks, third denies via
        // an explicit deny-favoring construction using security=deny isn't
        // reachable per-segment, so emulate with ask vs allow mix:
        let r = engine.decide("ls -la && rm -rf /tmp/x");
        assert_eq!(r.decision, Decision::Ask); // allow(ls) max ask(rm) = ask
    }

    #[test]
    fn ask_always_overrides_allowlist_allow() {
        let engine = ApprovalEngine::new(ApprovalConfig {
            security: SecurityLevel::Allowlist,
            ask: AskMode::Always,
            ask_fallback: SecurityLevel::Deny,
            auto_allow_skills: false,
        });
        engine.add_allowlist("ls *", None).unwrap();
        assert_eq!(engine.decide("ls -la").decision, Decision::Ask);
    }

    // ── CRUD ──────────────────────────────────────────────────────────────

    #[test]
    fn add_allowlist_rejects_empty_pattern() {
        let engine = ask_on_miss_engine();
        assert_eq!(engine.add_allowlist("", None).unwrap_err(), ApprovalError::InvalidPattern);
    }

    #[test]
    fn remove_allowlist_missing_id_returns_false_not_error() {
        let engine = ask_on_miss_engine();
        assert!(!engine.remove_allowlist("nope"));
    }

    #[test]
    fn remove_allowlist_by_id_or_pattern() {
        let engine = ask_on_miss_engine();
        let e = engine.add_allowlist("ls *", None).unwrap();
        assert!(engine.remove_allowlist(&e.id));
        assert!(engine.get_allowlist().is_empty());
    }

    #[test]
    fn update_allowlist_patches_pattern() {
        let engine = ask_on_miss_engine();
        let e = engine.add_allowlist("ls *", None).unwrap();
        let updated = engine.update_allowlist(&e.id, Some("cat *".into()), None).unwrap();
        assert_eq!(updated.pattern, "cat *");
    }

    // ── Export/import round-trip (spec.md §8 property 7) ──────────────────

    #[test]
    fn export_import_round_trips_observable_state() {
        let engine = ask_on_miss_engine();
        engine.add_allowlist("ls *", Some("list".into())).unwrap();
        engine.add_safe_bin("uptime");
        let exported = engine.export_config();
        let json = serde_json::to_string(&exported).unwrap();

        let fresh = ApprovalEngine::new(ApprovalConfig::default());
        fresh.import_config(&json).unwrap();

        assert_eq!(fresh.get_allowlist().len(), 1);
        assert_eq!(fresh.get_allowlist()[0].pattern, "ls *");
        assert!(fresh.safe_bins().contains(&"uptime".to_string()));
    }

    #[test]
    fn import_config_rejects_invalid_json() {
        let engine = ask_on_miss_engine();
        assert!(engine.import_config("not json").is_err());
    }

    #[test]
    fn reset_restores_defaults() {
        let engine = ask_on_miss_engine();
        engine.add_allowlist("ls *", None).unwrap();
        engine.reset();
        assert!(engine.get_allowlist().is_empty());
        assert_eq!(engine.policy().security, SecurityLevel::Allowlist);
    }

    // ── autoAllowSkills short-circuit ──────────────────────────────────────

    #[test]
    fn auto_allow_skills_short_circuits_skill_tools() {
        let engine = ApprovalEngine::new(ApprovalConfig {
            auto_allow_skills: true,
            ..ApprovalConfig::default()
        });
        assert_eq!(engine.is_skill_shortcut(true), Some(Decision::Allow));
        assert_eq!(engine.is_skill_shortcut(false), None);
    }

    #[test]
    fn ask_fallback_resolves_deterministically() {
        let engine = ApprovalEngine::new(ApprovalConfig {
            ask_fallback: SecurityLevel::Deny,
            ..ApprovalConfig::default()
        });
        assert_eq!(engine.resolve_ask_fallback(), Decision::Deny);
    }
}
