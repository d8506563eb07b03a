pub mod attempt_dto;
pub mod grading_dto;
