mod high_vol_repository;
mod signal_repository;
mod training_repository;
mod watch_repository;

pub use high_vol_repository::SqliteHighVolRepository;
pub use signal_repository::SqliteSignalRepository;
pub use training_repository::SqliteTrainingRepository;
pub use watch_repository::SqliteWatchRepository;
