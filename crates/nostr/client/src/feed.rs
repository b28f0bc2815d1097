//! Book similarity feed (kind 1729).

use crate::client::RelayClient;
use crate::error::{ClientError, Result};
use crate::message::Filter;
use bookstr_core::{
    ITEM_TAG, ItemRef, KIND_BOOK_SIMILARITY, Signer, Similarity, similarity_template,
};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Similarity relations that mention `item`, best score first.
///
/// Events that are not well-formed similarity relations are skipped.
pub async fn fetch_similarities(client: &RelayClient, item: &ItemRef) -> Result<Vec<Similarity>> {
    let filter = Filter::new()
        .kinds(vec![KIND_BOOK_SIMILARITY])
        .tag(ITEM_TAG, vec![item.tag_value()]);

    let events = client.query(vec![filter]).await?;
    let mut similarities: Vec<Similarity> = events
        .iter()
        .filter_map(|event| match Similarity::try_from_event(event) {
            Ok(similarity) => Some(similarity),
            Err(e) => {
                debug!(event_id = %event.id, error = %e, "skipping malformed similarity");
                None
            }
        })
        .filter(|similarity| similarity.involves(item))
        .collect();

    similarities.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(similarities)
}

/// Sign and publish a similarity relation between two books. Returns the
/// event id.
pub async fn publish_similarity(
    client: &RelayClient,
    signer: &dyn Signer,
    item_a: &ItemRef,
    item_b: &ItemRef,
    score: f64,
    content: &str,
) -> Result<String> {
    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ClientError::Internal(e.to_string()))?
        .as_secs();
    let template = similarity_template(item_a, item_b, score, content, created_at)
        .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
    client.sign_and_publish(template, signer).await
}
