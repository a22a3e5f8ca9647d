//! Concrete provider adapters

mod error_utils;
mod openai;
mod yandex;

pub use openai::OpenAiProvider;
pub use yandex::YandexProvider;
