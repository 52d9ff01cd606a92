//! Shared fixtures for integration tests

use aws_sdk_dynamodb::types::AttributeValue;
use dynastore::{
    Item, MemoryStoreClient, Record, Store, StoreConfig, UniqueFieldSpec,
};
use std::sync::Arc;

pub const TABLE: &str = "records";

/// Domain record with one unique field (email, scoped to the first two
/// partition-key segments)
pub struct Profile {
    pub pk: String,
    pub email: String,
    pub nickname: Option<String>,
}

impl Profile {
    pub fn new(pk: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            email: email.into(),
            nickname: None,
        }
    }
}

impl Record for Profile {
    fn partition_key(&self) -> String {
        self.pk.clone()
    }

    fn sort_key(&self) -> String {
        "PROFILE".to_string()
    }

    fn attributes(&self) -> Item {
        let mut attrs = Item::new();
        attrs.insert(
            "email".to_string(),
            AttributeValue::S(self.email.clone()),
        );
        if let Some(nickname) = &self.nickname {
            attrs.insert(
                "nickname".to_string(),
                AttributeValue::S(nickname.clone()),
            );
        }
        attrs
    }

    fn unique_fields(&self) -> Vec<UniqueFieldSpec> {
        vec![UniqueFieldSpec::new("email", 2)]
    }
}

/// Domain record with no unique fields
pub struct Note {
    pub pk: String,
    pub sk: String,
    pub body: String,
}

impl Note {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
            body: body.into(),
        }
    }
}

impl Record for Note {
    fn partition_key(&self) -> String {
        self.pk.clone()
    }

    fn sort_key(&self) -> String {
        self.sk.clone()
    }

    fn attributes(&self) -> Item {
        let mut attrs = Item::new();
        attrs.insert("body".to_string(), AttributeValue::S(self.body.clone()));
        attrs
    }
}

/// Open a facade over a fresh in-memory store
pub fn open_store(retries: u32) -> (Store, Arc<MemoryStoreClient>) {
    let client = Arc::new(MemoryStoreClient::new());
    let store = Store::new();
    let mut config = StoreConfig::new(TABLE);
    config.retries = retries;
    store
        .open_with_client(client.clone(), config)
        .expect("open_with_client");
    (store, client)
}
