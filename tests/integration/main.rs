mod api_tests;
mod workflow_tests;
mod postgres_tests;
