pub mod engine;
pub mod episode;
pub mod features;
pub mod game;
pub mod position;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineConfig, EngineProcess, SearchEngine};
pub use episode::{EpisodeConfig, EpisodeEnd, EpisodeError, EpisodeTrace, PositionRecord, run_episode};
pub use features::{DecodeError, FeatureDefect, decode_features};
pub use game::{GameConfig, GameOutcome, GameResult, run_game};
pub use position::{
    ParsedPosition, build_board, describe_position, load_start_positions, parse_fen_only,
    parse_position_line,
};
pub use types::{EvalRecord, InfoSnapshot, SearchLimit, SearchOutcome, duration_to_millis};
