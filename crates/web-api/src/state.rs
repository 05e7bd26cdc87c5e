use std::sync::Arc;

use application::{
    ConversationService, MessageService, PresenceService, ProfileService, StatusService,
};

use crate::registry::SessionRegistry;
use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub profile_service: Arc<ProfileService>,
    pub conversation_service: Arc<ConversationService>,
    pub message_service: Arc<MessageService>,
    pub status_service: Arc<StatusService>,
    pub presence_service: Arc<PresenceService>,
    pub jwt_service: Arc<JwtService>,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profile_service: Arc<ProfileService>,
        conversation_service: Arc<ConversationService>,
        message_service: Arc<MessageService>,
        status_service: Arc<StatusService>,
        presence_service: Arc<PresenceService>,
        jwt_service: Arc<JwtService>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            profile_service,
            conversation_service,
            message_service,
            status_service,
            presence_service,
            jwt_service,
            registry,
        }
    }
}
