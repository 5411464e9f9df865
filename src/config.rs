use std::path::PathBuf;

use clap::Parser;

use crate::history::DEFAULT_MAX_HISTORY_ITEMS;

/// Remote audio metadata editor with undo/redo history, served over MCP stdio.
#[derive(Debug, Clone, Parser)]
#[command(name = "metaremote", version)]
pub struct Config {
    /// Root of the music tree; every tool path is relative to it
    #[arg(long, env = "MUSIC_DIR", default_value = "/music")]
    pub music_dir: PathBuf,

    /// Number of actions kept in history before the oldest are evicted
    #[arg(long = "max-history", env = "MAX_HISTORY_ITEMS", default_value_t = DEFAULT_MAX_HISTORY_ITEMS)]
    pub max_history_items: usize,

    /// Directory for album-art blobs (default: a temporary directory removed on exit)
    #[arg(long, env = "METAREMOTE_ART_DIR")]
    pub art_dir: Option<PathBuf>,

    /// Include dot-files in folder listings and batch edits
    #[arg(long, env = "SHOW_HIDDEN_FILES")]
    pub show_hidden: bool,
}

impl Config {
    #[cfg(test)]
    pub(crate) fn for_root(music_dir: impl Into<PathBuf>) -> Self {
        Self {
            music_dir: music_dir.into(),
            max_history_items: DEFAULT_MAX_HISTORY_ITEMS,
            art_dir: None,
            show_hidden: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["metaremote"]).unwrap();
        assert_eq!(config.max_history_items, 1000);
        assert!(config.art_dir.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "metaremote",
            "--music-dir",
            "/srv/music",
            "--max-history",
            "10",
            "--art-dir",
            "/tmp/art",
            "--show-hidden",
        ])
        .unwrap();
        assert_eq!(config.music_dir, PathBuf::from("/srv/music"));
        assert_eq!(config.max_history_items, 10);
        assert_eq!(config.art_dir, Some(PathBuf::from("/tmp/art")));
        assert!(config.show_hidden);
    }
}
