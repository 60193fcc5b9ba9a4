pub(super) mod channel;
pub(super) mod health;
pub(super) mod key;
pub(super) mod logs;
pub(super) mod openai;
pub(super) mod proxy;
pub(super) mod settings;
pub(super) mod stats;
pub(super) mod token;

pub(super) use channel::{
    create_channel, delete_channel, get_channel, list_channels, update_channel,
};
pub(super) use health::health;
pub(super) use key::{
    check_all_keys, check_key, create_key, delete_key, get_key, import_keys, list_keys, update_key,
};
pub(super) use logs::list_logs;
pub(super) use openai::{chat_completions, embeddings, images_generations, list_models};
pub(super) use proxy::{
    create_proxy, delete_proxy, get_proxy, list_proxies, test_proxy, update_proxy,
};
pub(super) use settings::{get_settings, update_settings};
pub(super) use stats::dashboard;
pub(super) use token::{create_token, delete_token, list_tokens, update_token};
