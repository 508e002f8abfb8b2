// Repository layer for database operations

pub mod notification;
pub mod user;
pub mod user_state;

pub use notification::NotificationRepository;
pub use user::UserRepository;
pub use user_state::UserStateRepository;
