pub mod activity;
pub mod admin;
pub mod courses;
pub mod enrollments;
pub mod homeworks;
pub mod notifications;
pub mod quizzes;
pub mod resources;
pub mod users;
