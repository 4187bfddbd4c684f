pub mod ai_client;
pub mod audio;
pub mod completion;
pub mod decode;
pub mod exercises;
pub mod generation_guard;
pub mod lesson_pipeline;
pub mod live;
pub mod progress;
pub mod prompts;
pub mod runs;
