//! Runtime and self-match configuration.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take their `Default` values.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{GoLimit, OptionValue, Side};
use crate::rules::BasePosition;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Settings for a single agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// End the run on a malformed protocol line instead of skipping it.
    pub strict_protocol: bool,
    /// How long one poll of the input source may block.
    pub poll_interval_ms: u64,
    /// Options applied to the player before the read loop starts.
    pub options: BTreeMap<String, OptionValue>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            strict_protocol: false,
            poll_interval_ms: 50,
            options: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What the relay does with a move the rule engine rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IllegalMovePolicy {
    /// End the match with an error.
    #[default]
    Fail,
    /// The offender loses the game by foul.
    Foul,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfMatchConfig {
    pub games: u32,
    /// Games reaching this many plies end as `MaxPlies`.
    pub max_plies: Option<u32>,
    /// A side that does not answer `go` in time loses on time. Applies on
    /// top of the clock run by a timed `limit`.
    pub turn_timeout_ms: Option<u64>,
    pub ready_timeout_ms: u64,
    /// Wall-clock budget for the whole match. Once spent, the game in
    /// progress is abandoned and no further game starts.
    pub uptime_ms: Option<u64>,
    /// Upper bound on waiting for side threads during cleanup.
    pub join_timeout_ms: u64,
    /// Player 2 takes Black in the first game.
    pub flip_players: bool,
    /// Swap colors after every game.
    pub alternate_colors: bool,
    pub illegal_move: IllegalMovePolicy,
    pub limit: GoLimit,
    pub start: BasePosition,
    pub player1_options: BTreeMap<String, OptionValue>,
    pub player2_options: BTreeMap<String, OptionValue>,
    /// Runtime settings shared by both sides.
    pub agent: AgentConfig,
}

impl Default for SelfMatchConfig {
    fn default() -> Self {
        Self {
            games: 1,
            max_plies: None,
            turn_timeout_ms: None,
            ready_timeout_ms: 30_000,
            uptime_ms: None,
            join_timeout_ms: 5_000,
            flip_players: false,
            alternate_colors: false,
            illegal_move: IllegalMovePolicy::default(),
            limit: GoLimit::default(),
            start: BasePosition::default(),
            player1_options: BTreeMap::new(),
            player2_options: BTreeMap::new(),
            agent: AgentConfig::default(),
        }
    }
}

impl SelfMatchConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_ms.map(Duration::from_millis)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.uptime_ms.map(Duration::from_millis)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Side playing Black in game `game` (zero-based).
    pub fn black_for_game(&self, game: u32) -> Side {
        let mut black = if self.flip_players {
            Side::Player2
        } else {
            Side::Player1
        };
        if self.alternate_colors && game % 2 == 1 {
            black = black.other();
        }
        black
    }

    pub fn options_for(&self, side: Side) -> &BTreeMap<String, OptionValue> {
        match side {
            Side::Player1 => &self.player1_options,
            Side::Player2 => &self.player2_options,
        }
    }
}
