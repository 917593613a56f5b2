//! Hotspot detection
//!
//! A complaint joins or founds a cluster when the similarity index returns
//! at least one other complaint that is both semantically close and shares
//! a location token with it. Clusters are created lazily, reused by later
//! joiners, and back-linked onto earlier complaints the moment they are
//! discovered.
//!
//! All cluster writes for one complaint (its own `cluster_id`, the
//! back-links onto co-members and the cluster's counters) happen in one
//! SQLite transaction, with cluster ids re-read inside it, so concurrent
//! jobs never double-count or split a hotspot.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::TransactionBehavior;
use tracing::{debug, info};

use crate::db::{clusters, complaints, Database};
use crate::error::TriageError;
use crate::models::Complaint;
use crate::pipeline::PipelineConfig;
use crate::similarity::{SimilarityIndex, SimilarityMatch, SimilarityMetadata};

/// What the cluster step did for one complaint
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutcome {
    /// Local matches including the complaint itself
    pub match_count: usize,
    pub boost: f64,
    pub cluster_id: Option<i64>,
    pub created: bool,
    /// Other complaints whose `cluster_id` was assigned by this step
    pub backlinked: Vec<i64>,
}

impl ClusterOutcome {
    fn unclustered(match_count: usize) -> Self {
        Self {
            match_count,
            boost: 0.0,
            cluster_id: None,
            created: false,
            backlinked: Vec::new(),
        }
    }
}

/// Lower-cased, comma-stripped, whitespace-split location tokens.
pub fn location_tokens(location: &str) -> HashSet<String> {
    location
        .to_lowercase()
        .replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Keep candidates that share at least one location token with `location`.
pub fn spatial_filter(location: &str, candidates: Vec<SimilarityMatch>) -> Vec<SimilarityMatch> {
    let own = location_tokens(location);
    candidates
        .into_iter()
        .filter(|m| !own.is_disjoint(&location_tokens(&m.metadata.location)))
        .collect()
}

/// `min(cap, n * (1 - mean_distance))` over all local matches, floored at 0.
///
/// With `distance_threshold` above 1 the mean distance can exceed 1; the
/// boost then bottoms out at 0 rather than lowering the score.
pub fn density_boost(distances: &[f32], cap: f64) -> f64 {
    if distances.is_empty() {
        return 0.0;
    }
    let n = distances.len() as f64;
    let mean = distances.iter().map(|d| f64::from(*d)).sum::<f64>() / n;
    (n * (1.0 - mean)).clamp(0.0, cap)
}

/// Cluster assignment driven by the similarity index
pub struct ClusterEngine {
    db: Arc<Database>,
    index: Arc<SimilarityIndex>,
    limit: usize,
    threshold: f32,
    boost_cap: f64,
}

impl ClusterEngine {
    pub fn new(db: Arc<Database>, index: Arc<SimilarityIndex>, config: &PipelineConfig) -> Self {
        Self {
            db,
            index,
            limit: config.similarity_limit,
            threshold: config.distance_threshold,
            boost_cap: config.density_boost_cap,
        }
    }

    /// Index the complaint, find local neighbors and join or create a cluster.
    ///
    /// `running_score` is the weighted severity so far; it seeds a new
    /// cluster's average and is folded into an existing one.
    pub async fn detect(
        &self,
        complaint: &Complaint,
        text: &str,
        category: Option<&str>,
        running_score: f64,
    ) -> Result<ClusterOutcome, TriageError> {
        let metadata = SimilarityMetadata {
            location: complaint.location.clone(),
            category: category.map(str::to_string),
        };
        self.index.index(complaint.id, text, &metadata).await?;

        let candidates = self.index.query(text, self.limit, self.threshold).await?;
        let local = spatial_filter(&complaint.location, candidates);
        let others: Vec<&SimilarityMatch> = local.iter().filter(|m| m.complaint_id != complaint.id).collect();

        if others.is_empty() {
            debug!(complaint_id = complaint.id, "No local matches");
            return Ok(ClusterOutcome::unclustered(1));
        }

        // The complaint itself counts as a match at distance zero
        let mut distances: Vec<f32> = vec![0.0];
        distances.extend(others.iter().map(|m| m.distance));
        let boost = density_boost(&distances, self.boost_cap);

        let mut member_ids = vec![complaint.id];
        member_ids.extend(others.iter().map(|m| m.complaint_id));

        let score = (running_score + boost).clamp(1.0, 10.0);
        let name = format!("Hotspot: {} - {}", complaint.location, category.unwrap_or("General"));
        let (cluster_id, created, backlinked) =
            self.assign(complaint.id, &member_ids, &name, category, &complaint.location, score)?;

        info!(
            complaint_id = complaint.id,
            cluster_id,
            created,
            matches = member_ids.len(),
            boost,
            "Cluster assigned"
        );

        Ok(ClusterOutcome {
            match_count: member_ids.len(),
            boost,
            cluster_id: Some(cluster_id),
            created,
            backlinked,
        })
    }

    /// Join the first cluster held by any member (self first), or create one.
    fn assign(
        &self,
        complaint_id: i64,
        member_ids: &[i64],
        name: &str,
        category: Option<&str>,
        location_zone: &str,
        score: f64,
    ) -> Result<(i64, bool, Vec<i64>), TriageError> {
        self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| TriageError::Database(format!("Begin cluster transaction failed: {}", e)))?;

            let current = complaints::cluster_ids_of(&tx, member_ids)?;
            let existing = current.iter().find_map(|(_, cluster)| *cluster);
            let unclustered: Vec<i64> = current
                .iter()
                .filter(|(id, cluster)| cluster.is_none() && *id != complaint_id)
                .map(|(id, _)| *id)
                .collect();

            let result = match existing {
                Some(cluster_id) => {
                    complaints::set_cluster(&tx, complaint_id, cluster_id)?;
                    for id in &unclustered {
                        complaints::set_cluster(&tx, *id, cluster_id)?;
                    }
                    let (others, others_sum) = clusters::member_stats(&tx, cluster_id, Some(complaint_id))?;
                    let count = others + 1;
                    let avg = (others_sum + score) / count as f64;
                    clusters::update_stats(&tx, cluster_id, count, avg)?;
                    (cluster_id, false, unclustered)
                }
                None => {
                    let cluster_id = clusters::insert_cluster(
                        &tx,
                        name,
                        category,
                        location_zone,
                        score,
                        member_ids.len() as i64,
                    )?;
                    complaints::set_cluster(&tx, complaint_id, cluster_id)?;
                    for id in &unclustered {
                        complaints::set_cluster(&tx, *id, cluster_id)?;
                    }
                    let count = clusters::count_members(&tx, cluster_id, None)?;
                    clusters::update_stats(&tx, cluster_id, count, score)?;
                    (cluster_id, true, unclustered)
                }
            };

            tx.commit()
                .map_err(|e| TriageError::Database(format!("Commit cluster transaction failed: {}", e)))?;
            Ok(result)
        })
    }
}
