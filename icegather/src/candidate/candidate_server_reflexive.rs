use super::*;
use crate::network_type::determine_network_type;
use crate::rand::generate_cand_id;
use shared::error::*;

/// The config required to create a new server reflexive candidate.
#[derive(Default)]
pub struct CandidateServerReflexiveConfig {
    pub base_config: CandidateConfig,

    /// The local address the mapping was observed from.
    pub base_address: Option<SocketAddr>,
    pub rel_addr: Option<SocketAddr>,
}

impl CandidateServerReflexiveConfig {
    /// Creates a new server reflexive candidate.
    pub fn new_candidate_server_reflexive(self) -> Result<Candidate> {
        let mut candidate_id = self.base_config.candidate_id;
        if candidate_id.is_empty() {
            candidate_id = generate_cand_id();
        }

        let address = self.base_config.address.ok_or(Error::ErrAddressParseFailed)?;
        let base_address = self.base_address.ok_or(Error::ErrAddressParseFailed)?;
        let network_type = determine_network_type(&self.base_config.network, &address.ip())?;

        Ok(Candidate {
            id: candidate_id,
            network_type,
            candidate_type: CandidateType::ServerReflexive,
            component: self.base_config.component,
            address,
            base_address,
            related_address: self.rel_addr,
            local_preference: self
                .base_config
                .local_preference
                .unwrap_or(DEFAULT_LOCAL_PREFERENCE),
            username: self.base_config.username,
            password: self.base_config.password,
            is_final: false,
        })
    }
}
