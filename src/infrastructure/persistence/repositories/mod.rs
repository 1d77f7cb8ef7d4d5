mod candle_repository;
mod prediction_repository;
mod training_repository;

pub use candle_repository::SqliteCandleRepository;
pub use prediction_repository::SqlitePredictionRepository;
pub use training_repository::SqliteTrainingRepository;
