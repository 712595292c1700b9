pub(super) mod api {
    use axum::{
        Extension, Json,
        extract::{Path, State},
    };
    use serde::{Deserialize, Serialize};

    use crate::conversation::{
        self,
        model::{Conversation, ConversationSummary, Message},
    };
    use crate::{delivery, user};

    pub async fn find_all(
        Extension(principal): Extension<user::Id>,
        conversation_service: State<conversation::Service>,
    ) -> crate::Result<Json<Vec<ConversationSummary>>> {
        let summaries = conversation_service.list_for_principal(&principal).await?;
        Ok(Json(summaries))
    }

    pub async fn open(
        Extension(principal): Extension<user::Id>,
        delivery: State<delivery::Coordinator>,
        Path(id): Path<conversation::Id>,
    ) -> crate::Result<Json<Conversation>> {
        let conversation = delivery.open(&id, &principal).await?;
        Ok(Json(conversation))
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase", deny_unknown_fields)]
    pub struct CreateParams {
        receiver_id: user::Id,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Created {
        conversation_id: conversation::Id,
        already_existed: bool,
    }

    pub async fn create(
        Extension(principal): Extension<user::Id>,
        delivery: State<delivery::Coordinator>,
        Json(params): Json<CreateParams>,
    ) -> crate::Result<Json<Created>> {
        let resolved = delivery
            .create_conversation(&principal, &params.receiver_id)
            .await?;

        Ok(Json(Created {
            conversation_id: *resolved.conversation.id(),
            already_existed: resolved.already_existed,
        }))
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase", deny_unknown_fields)]
    pub struct SendMessageParams {
        conversation_id: conversation::Id,
        content: String,
    }

    pub async fn send_message(
        Extension(principal): Extension<user::Id>,
        delivery: State<delivery::Coordinator>,
        Json(params): Json<SendMessageParams>,
    ) -> crate::Result<Json<Message>> {
        let message = delivery
            .send_message(&principal, &params.conversation_id, params.content)
            .await?;
        Ok(Json(message))
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Read {
        transitioned_count: usize,
    }

    pub async fn mark_read(
        Extension(principal): Extension<user::Id>,
        delivery: State<delivery::Coordinator>,
        Path(id): Path<conversation::Id>,
    ) -> crate::Result<Json<Read>> {
        let transitioned_count = delivery.mark_read(&id, &principal).await?;
        Ok(Json(Read { transitioned_count }))
    }
}
