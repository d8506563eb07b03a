pub mod access;
pub mod analytics_service;
pub mod attempt_service;
pub mod grading_service;
pub mod locks;
pub mod manual_grading_service;
pub mod score_service;
