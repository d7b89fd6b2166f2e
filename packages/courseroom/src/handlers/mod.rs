pub mod courses;
pub mod health;
pub mod messages;

// Re-export all handlers for easy route registration
pub use courses::{course_page, create_course, index};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use messages::post_message;
