//! Deployed-artifact lookups

use std::sync::Arc;

use crate::models::ArtifactKey;
use crate::observe::{Observation, Operation, Outcome, SyncObserver, TracingObserver};
use crate::store::ArtifactStore;
use crate::utils::Timer;

use super::{ApiResponse, QueryError};

/// Read side of the artifact store
#[derive(Clone)]
pub struct QueryGateway {
    store: Arc<ArtifactStore>,
    observer: Arc<dyn SyncObserver>,
}

impl QueryGateway {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self {
            store,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Serialized configuration of a deployed API
    pub fn get_deployed_api(
        &self,
        tenant: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<String>, QueryError> {
        let timer = Timer::start("get_deployed_api");
        let key = ArtifactKey::new(tenant, name, version);

        let result = self
            .store
            .get_key(&key)
            .map(|found| found.filter(|a| a.is_api()).map(|a| a.payload.clone()))
            .map_err(QueryError::from);

        let outcome = match &result {
            Ok(Some(_)) => Outcome::Found,
            Ok(None) => Outcome::NotFound,
            Err(_) => Outcome::Fault,
        };
        let mut observation =
            Observation::for_key(&key, Operation::QueryApi, outcome).latency(timer.elapsed());
        if let Err(e) = &result {
            observation = observation.detail(e.to_string());
        }
        self.observer.observe(&observation);

        result
    }

    /// Names of the sequences deployed for an API, in key order
    pub fn get_deployed_sequences(
        &self,
        tenant: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<String>, QueryError> {
        let timer = Timer::start("get_deployed_sequences");
        let key = ArtifactKey::new(tenant, name, version);

        let result = self
            .store
            .list_sequences(tenant, name, version)
            .map(|sequences| sequences.iter().map(|s| s.key.name.clone()).collect::<Vec<_>>())
            .map_err(QueryError::from);

        let observation = match &result {
            Ok(names) => Observation::for_key(&key, Operation::QuerySequences, Outcome::Found)
                .detail(format!("{} sequences", names.len())),
            Err(e) => Observation::for_key(&key, Operation::QuerySequences, Outcome::Fault)
                .detail(e.to_string()),
        };
        self.observer.observe(&observation.latency(timer.elapsed()));

        result
    }

    /// GET artifact: 200 with the payload, 404 when absent, 500 on fault
    pub fn status_for_api(&self, tenant: &str, name: &str, version: &str) -> ApiResponse {
        api_response(
            self.get_deployed_api(tenant, name, version),
            &ArtifactKey::new(tenant, name, version),
        )
    }

    /// GET sequences: 200 with a JSON list, 404 only when the API is absent
    pub fn status_for_sequences(&self, tenant: &str, name: &str, version: &str) -> ApiResponse {
        let key = ArtifactKey::new(tenant, name, version);
        match self.get_deployed_api(tenant, name, version) {
            Ok(Some(_)) => {}
            other => return api_response(other, &key),
        }
        sequences_response(self.get_deployed_sequences(tenant, name, version))
    }
}

fn api_response(result: Result<Option<String>, QueryError>, key: &ArtifactKey) -> ApiResponse {
    match result {
        Ok(Some(payload)) => ApiResponse::ok(payload),
        Ok(None) => ApiResponse::not_found(format!("API {key} is not deployed")),
        Err(e) => ApiResponse::internal_error(e.to_string()),
    }
}

fn sequences_response(result: Result<Vec<String>, QueryError>) -> ApiResponse {
    match result.map(|names| serde_json::to_string(&names)) {
        Ok(Ok(body)) => ApiResponse::ok(body),
        Ok(Err(e)) => ApiResponse::internal_error(e.to_string()),
        Err(e) => ApiResponse::internal_error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiRef, Artifact, ArtifactKind};
    use crate::observe::RecordingObserver;
    use crate::store::StoreError;
    use std::thread;

    fn gateway() -> (QueryGateway, Arc<ArtifactStore>, Arc<RecordingObserver>) {
        let store = Arc::new(ArtifactStore::new());
        let recorder = Arc::new(RecordingObserver::new());
        let gateway = QueryGateway::new(Arc::clone(&store)).observer(recorder.clone());
        (gateway, store, recorder)
    }

    fn pet_store(payload: &str, version: u64) -> Artifact {
        Artifact::new(
            ArtifactKey::new("t1", "PetStore", "v1"),
            ArtifactKind::Api,
            payload,
            version,
        )
    }

    fn sequence(name: &str) -> Artifact {
        Artifact::new(
            ArtifactKey::new("t1", name, "v1"),
            ArtifactKind::Sequence,
            "<sequence/>",
            3,
        )
        .with_api(ApiRef::new("PetStore", "v1"))
    }

    #[test]
    fn test_get_deployed_api() {
        let (gateway, store, recorder) = gateway();
        assert_eq!(gateway.get_deployed_api("t1", "PetStore", "v1").unwrap(), None);

        store.put(pet_store("P1", 5)).unwrap();
        assert_eq!(
            gateway.get_deployed_api("t1", "PetStore", "v1").unwrap(),
            Some("P1".to_string())
        );
        assert_eq!(gateway.get_deployed_api("t2", "PetStore", "v1").unwrap(), None);

        assert_eq!(recorder.with_outcome(Outcome::Found).len(), 1);
        assert_eq!(recorder.with_outcome(Outcome::NotFound).len(), 2);
    }

    #[test]
    fn test_non_api_artifact_is_not_an_api() {
        let (gateway, store, _) = gateway();
        store.put(sequence("PetStore--In")).unwrap();

        assert_eq!(gateway.get_deployed_api("t1", "PetStore--In", "v1").unwrap(), None);
    }

    #[test]
    fn test_sequences_empty_is_success() {
        let (gateway, store, _) = gateway();
        store.put(pet_store("P1", 5)).unwrap();

        assert!(gateway
            .get_deployed_sequences("t1", "PetStore", "v1")
            .unwrap()
            .is_empty());
        assert_eq!(
            gateway.status_for_sequences("t1", "PetStore", "v1"),
            ApiResponse::ok("[]")
        );
    }

    #[test]
    fn test_sequences_listed_in_order() {
        let (gateway, store, _) = gateway();
        store.put(pet_store("P1", 5)).unwrap();
        store.put(sequence("PetStore--Out")).unwrap();
        store.put(sequence("PetStore--In")).unwrap();

        let response = gateway.status_for_sequences("t1", "PetStore", "v1");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"["PetStore--In","PetStore--Out"]"#);
    }

    #[test]
    fn test_status_codes() {
        let (gateway, store, _) = gateway();

        assert_eq!(gateway.status_for_api("t1", "PetStore", "v1").status, 404);
        assert_eq!(gateway.status_for_sequences("t1", "PetStore", "v1").status, 404);

        store.put(pet_store("P1", 5)).unwrap();
        assert_eq!(
            gateway.status_for_api("t1", "PetStore", "v1"),
            ApiResponse::ok("P1")
        );
        assert!(gateway.status_for_sequences("t1", "PetStore", "v1").is_success());
    }

    #[test]
    fn test_store_fault_maps_to_500() {
        let key = ArtifactKey::new("t1", "PetStore", "v1");
        let fault = QueryError::from(StoreError::Corrupted {
            tenant: "t1".to_string(),
            key: key.clone(),
        });

        assert_eq!(api_response(Err(fault.clone()), &key).status, 500);
        assert_eq!(sequences_response(Err(fault)).status, 500);
    }

    #[test]
    fn test_reads_during_writes_see_whole_values() {
        let (gateway, store, _) = gateway();
        store.put(pet_store("payload-0", 0)).unwrap();

        let reader = {
            let gateway = gateway.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let payload = gateway
                        .get_deployed_api("t1", "PetStore", "v1")
                        .unwrap()
                        .unwrap();
                    assert!(payload.starts_with("payload-"));
                }
            })
        };

        for v in 1..200u64 {
            store.put(pet_store(&format!("payload-{v}"), v)).unwrap();
        }
        reader.join().unwrap();
    }
}
