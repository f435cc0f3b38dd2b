pub mod artifacts;
pub mod enigma;
pub mod ledger;
pub mod secret_network;

use crate::config::db::MongoConfig;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::Client as MongoClient;
use mongodb::{Database, IndexModel};

pub const DEPOSITS_COLLECTION: &str = "deposits";
pub const DEALS_COLLECTION: &str = "deals";
pub const CACHE_COLLECTION: &str = "cache";

pub const LAST_MIX_BLOCK_NUMBER_KEY: &str = "last_mix_block_number";
pub const ACTIVE_DEAL_KEY: &str = "active_deal";

#[derive(Debug, Clone)]
pub struct InfraClients {
    pub mongo_db: Database,
}

pub async fn init_infra(mongo: Option<&MongoConfig>) -> Result<Option<InfraClients>, String> {
    let Some(mongo) = mongo else {
        return Ok(None);
    };

    let mongo_client = MongoClient::with_uri_str(&mongo.url)
        .await
        .map_err(|e| format!("mongodb client init failed: {e}"))?;
    let mongo_db = mongo_client.database(&mongo.database);
    ensure_indexes(&mongo_db).await?;
    Ok(Some(InfraClients { mongo_db }))
}

async fn ensure_indexes(db: &Database) -> Result<(), String> {
    let unique = IndexOptions::builder().unique(true).build();

    db.collection::<mongodb::bson::Document>(DEPOSITS_COLLECTION)
        .create_indexes(vec![
            IndexModel::builder()
                .keys(doc! { "deposit_id": 1 })
                .options(unique.clone())
                .build(),
            IndexModel::builder()
                .keys(doc! { "status": 1, "amount": 1 })
                .build(),
        ])
        .await
        .map_err(|e| format!("mongodb deposit index creation failed: {e}"))?;

    db.collection::<mongodb::bson::Document>(DEALS_COLLECTION)
        .create_indexes(vec![
            IndexModel::builder()
                .keys(doc! { "deal_id": 1 })
                .options(unique)
                .build(),
            IndexModel::builder().keys(doc! { "status": 1 }).build(),
        ])
        .await
        .map_err(|e| format!("mongodb deal index creation failed: {e}"))?;
    Ok(())
}
