//! The `KVStore` interface and its Redis-backed and in-memory implementations.

pub mod kvstore;
pub mod redis_store;

pub use kvstore::{KVStore, SharedKVStore};
pub use redis_store::{shared_in_memory, InMemoryKVStore, RedisKVStore};
