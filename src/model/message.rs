// Messages - Data requests and their responses
//
// A DataRequest is issued when a peer's digest proves we are missing or
// holding stale items. It carries the digest build time that justified it so
// the response can advance the freshness cache together with the data.

use crate::model::{KeyIdPair, MemberId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// "Please send me these items"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Member that wants the items
    pub source: MemberId,
    /// Member expected to serve them (the author of the digest)
    pub destination: MemberId,
    pub associated_build_time: BTreeMap<MemberId, Timestamp>,
    pub key_id_pairs: Vec<KeyIdPair>,
}

impl DataRequest {
    pub fn new(source: MemberId, destination: MemberId, key_id_pairs: Vec<KeyIdPair>) -> Self {
        Self {
            source,
            destination,
            associated_build_time: BTreeMap::new(),
            key_id_pairs,
        }
    }

    /// Tag the request with the build time of `owner`'s digest
    pub fn with_build_time(mut self, owner: MemberId, build_time: Timestamp) -> Self {
        self.associated_build_time.insert(owner, build_time);
        self
    }
}

/// Fulfillment of a DataRequest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResponse<I> {
    pub associated_build_time: BTreeMap<MemberId, Timestamp>,
    pub items: Vec<I>,
}

impl<I> DataResponse<I> {
    /// Answer `request` with `items`, echoing its build times
    pub fn for_request(request: &DataRequest, items: Vec<I>) -> Self {
        Self {
            associated_build_time: request.associated_build_time.clone(),
            items,
        }
    }
}
