use std::fmt::Display;
use std::sync::Arc;

use axum::Extension;
use axum::extract::ws::Message::{Binary, Close, Text};
use axum::extract::ws::{self, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, warn};
use serde_json::from_str;
use tokio::sync::{Notify, mpsc};
use tokio::try_join;

use super::gateway::Gateway;
use super::model::{Command, Event, SessionId};
use crate::{conversation, delivery, user};

pub async fn ws(
    Extension(principal): Extension<user::Id>,
    ws: WebSocketUpgrade,
    State(gateway): State<Gateway>,
    State(delivery): State<delivery::Coordinator>,
    State(conversation_service): State<conversation::Service>,
) -> Response {
    let dispatcher = Dispatcher {
        gateway,
        delivery,
        conversation_service,
    };
    ws.on_upgrade(move |socket| handle_socket(principal, socket, dispatcher))
}

#[derive(Clone)]
struct Context {
    principal: user::Id,
    session: SessionId,
    close: Arc<Notify>,
}

#[derive(Clone)]
struct Dispatcher {
    gateway: Gateway,
    delivery: delivery::Coordinator,
    conversation_service: conversation::Service,
}

async fn handle_socket(principal: user::Id, socket: WebSocket, dispatcher: Dispatcher) {
    let (sender, receiver) = socket.split();
    serve(principal, sender, receiver, dispatcher).await
}

/// Runs one session until either side closes, then drops its memberships.
async fn serve<W, R>(principal: user::Id, sender: W, receiver: R, dispatcher: Dispatcher)
where
    W: Sink<ws::Message> + Unpin + Send + 'static,
    W::Error: Display,
    R: Stream<Item = Result<ws::Message, axum::Error>> + Unpin + Send + 'static,
{
    let (session, events) = dispatcher.gateway.connect(principal).await;
    let ctx = Context {
        principal,
        session,
        close: Arc::new(Notify::new()),
    };

    let read_task = tokio::spawn(read(ctx.clone(), receiver, dispatcher.clone()));
    let write_task = tokio::spawn(write(ctx.clone(), sender, events));

    match try_join!(read_task, write_task) {
        Ok(_) => debug!("WS session {session} disconnected gracefully"),
        Err(e) => error!("WS session {session} disconnected with error: {e}"),
    }

    dispatcher.gateway.disconnect(&session).await;
}

async fn read<R>(ctx: Context, mut receiver: R, dispatcher: Dispatcher)
where
    R: Stream<Item = Result<ws::Message, axum::Error>> + Unpin,
{
    loop {
        tokio::select! {
            // close is notified => stop 'read' task
            _ = ctx.close.notified() => break,

            frame = receiver.next() => {
                match frame {
                    None => {
                        ctx.close.notify_one();
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Failed to read WS frame: {e}");
                        ctx.close.notify_one(); // notify 'write' task to stop
                        break;
                    }
                    Some(Ok(Close(frame))) => {
                        debug!("WS connection closed by client: {frame:?}");
                        ctx.close.notify_one(); // notify 'write' task to stop
                        break;
                    }
                    Some(Ok(Text(content))) => handle_text_frame(&ctx, content.as_str(), &dispatcher).await,
                    Some(Ok(Binary(content))) => warn!("Received binary WS frame: {content:?}"),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn handle_text_frame(ctx: &Context, content: &str, dispatcher: &Dispatcher) {
    let command = match from_str::<Command>(content) {
        Ok(command) => command,
        Err(e) => {
            warn!("Skipping text frame, content is malformed ({e}): {content}");
            return;
        }
    };

    if let Err(e) = dispatcher.handle(ctx, command).await {
        warn!(
            "Command of {} in session {} failed: {e}",
            ctx.principal, ctx.session
        );
    }
}

impl Dispatcher {
    async fn handle(&self, ctx: &Context, command: Command) -> conversation::Result<()> {
        match command {
            Command::JoinRoom { conversation_id } => {
                self.conversation_service
                    .check_participant(&conversation_id, &ctx.principal)
                    .await?;
                self.gateway.join(&ctx.session, &conversation_id).await;
            }
            Command::LeaveRoom { conversation_id } => {
                self.gateway.leave(&ctx.session, &conversation_id).await;
            }
            Command::SendMessage {
                conversation_id,
                content,
            } => {
                self.delivery
                    .send_message(&ctx.principal, &conversation_id, content)
                    .await?;
            }
            Command::Typing { conversation_id } => {
                self.delivery
                    .typing(&ctx.session, &ctx.principal, &conversation_id, true)
                    .await?;
            }
            Command::StopTyping { conversation_id } => {
                self.delivery
                    .typing(&ctx.session, &ctx.principal, &conversation_id, false)
                    .await?;
            }
            Command::MarkRead { conversation_id } => {
                self.delivery
                    .mark_read(&conversation_id, &ctx.principal)
                    .await?;
            }
        }

        Ok(())
    }
}

async fn write<W>(ctx: Context, mut sender: W, mut events: mpsc::Receiver<Event>)
where
    W: Sink<ws::Message> + Unpin,
    W::Error: Display,
{
    loop {
        tokio::select! {
            // close is notified => stop 'write' task
            _ = ctx.close.notified() => break,

            item = events.recv() => {
                let Some(event) = item else {
                    break;
                };

                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to serialize event: {e}");
                        continue;
                    }
                };

                if let Err(e) = sender.send(Text(payload.into())).await {
                    error!("Failed to send event to session {}: {e}", ctx.session);
                    ctx.close.notify_one(); // notify 'read' task to stop
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use futures::{sink, stream};

    use crate::state::AppState;

    use super::*;

    struct Fixture {
        state: AppState,
        dispatcher: Dispatcher,
        room: conversation::Id,
        buyer: user::Id,
        agent: user::Id,
    }

    async fn fixture() -> Fixture {
        let buyer = user::Id::random();
        let agent = user::Id::random();
        let state = AppState::in_memory([buyer, agent]);
        let room = *state
            .delivery
            .create_conversation(&buyer, &agent)
            .await
            .unwrap()
            .conversation
            .id();
        let dispatcher = Dispatcher {
            gateway: state.gateway.clone(),
            delivery: state.delivery.clone(),
            conversation_service: state.conversation_service.clone(),
        };

        Fixture {
            state,
            dispatcher,
            room,
            buyer,
            agent,
        }
    }

    impl Fixture {
        async fn connect(&self, principal: user::Id) -> (Context, mpsc::Receiver<Event>) {
            let (session, events) = self.state.gateway.connect(principal).await;
            let ctx = Context {
                principal,
                session,
                close: Arc::new(Notify::new()),
            };
            (ctx, events)
        }
    }

    fn text(json: &str) -> Result<ws::Message, axum::Error> {
        Ok(Text(json.into()))
    }

    #[tokio::test]
    async fn should_refuse_join_of_stranger() {
        let f = fixture().await;
        let (ctx, _events) = f.connect(user::Id::random()).await;

        let res = f
            .dispatcher
            .handle(
                &ctx,
                Command::JoinRoom {
                    conversation_id: f.room,
                },
            )
            .await;

        assert!(matches!(res, Err(conversation::Error::NotParticipant(_))));
        assert_eq!(f.state.gateway.members(&f.room).await, 0);
    }

    #[tokio::test]
    async fn should_join_and_leave_room() {
        let f = fixture().await;
        let (ctx, _events) = f.connect(f.agent).await;
        let join = Command::JoinRoom {
            conversation_id: f.room,
        };

        f.dispatcher.handle(&ctx, join).await.unwrap();
        assert_eq!(f.state.gateway.members(&f.room).await, 1);

        f.dispatcher
            .handle(
                &ctx,
                Command::LeaveRoom {
                    conversation_id: f.room,
                },
            )
            .await
            .unwrap();
        assert_eq!(f.state.gateway.members(&f.room).await, 0);
    }

    #[tokio::test]
    async fn should_deliver_sent_message_and_read_mark() {
        let f = fixture().await;
        let (buyer_ctx, mut buyer_events) = f.connect(f.buyer).await;
        let (agent_ctx, mut agent_events) = f.connect(f.agent).await;
        for ctx in [&buyer_ctx, &agent_ctx] {
            f.dispatcher
                .handle(
                    ctx,
                    Command::JoinRoom {
                        conversation_id: f.room,
                    },
                )
                .await
                .unwrap();
        }

        f.dispatcher
            .handle(
                &buyer_ctx,
                Command::SendMessage {
                    conversation_id: f.room,
                    content: "Is parking included?".into(),
                },
            )
            .await
            .unwrap();

        let Some(Event::MessageReceived { message }) = agent_events.recv().await else {
            panic!("expected message_received");
        };
        assert_eq!(message.content(), "Is parking included?");
        assert_eq!(message.sender_id(), &f.buyer);
        assert!(matches!(
            buyer_events.recv().await,
            Some(Event::MessageReceived { .. })
        ));

        f.dispatcher
            .handle(
                &agent_ctx,
                Command::MarkRead {
                    conversation_id: f.room,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            buyer_events.recv().await,
            Some(Event::MessagesRead {
                conversation_id: f.room,
                reader_id: f.agent,
                count: 1
            })
        );
    }

    #[tokio::test]
    async fn should_keep_session_after_malformed_frame() {
        let f = fixture().await;
        let (ctx, mut events) = f.connect(f.agent).await;
        let join = format!(r#"{{"type":"join_room","conversationId":"{}"}}"#, f.room);

        handle_text_frame(&ctx, "not json", &f.dispatcher).await;
        handle_text_frame(&ctx, r#"{"type":"shout","conversationId":"x"}"#, &f.dispatcher).await;
        handle_text_frame(&ctx, &join, &f.dispatcher).await;

        assert_eq!(f.state.gateway.members(&f.room).await, 1);
        f.state
            .delivery
            .send_message(&f.buyer, &f.room, "still there?".into())
            .await
            .unwrap();
        assert!(matches!(
            events.recv().await,
            Some(Event::MessageReceived { .. })
        ));
    }

    #[tokio::test]
    async fn should_process_frames_until_close_then_disconnect() {
        let f = fixture().await;
        let frames = stream::iter(vec![
            text("{"),
            text(&format!(
                r#"{{"type":"join_room","conversationId":"{}"}}"#,
                f.room
            )),
            text(&format!(
                r#"{{"type":"send_message","conversationId":"{}","content":"Two bedrooms?"}}"#,
                f.room
            )),
            Ok(Close(None)),
            text(&format!(
                r#"{{"type":"send_message","conversationId":"{}","content":"after close"}}"#,
                f.room
            )),
        ]);

        tokio::time::timeout(
            Duration::from_secs(5),
            serve(f.buyer, sink::drain(), frames, f.dispatcher.clone()),
        )
        .await
        .unwrap();

        let c = f
            .state
            .conversation_service
            .find_by_id(&f.room, &f.buyer)
            .await
            .unwrap();
        assert_eq!(c.messages().len(), 1);
        assert_eq!(c.messages()[0].content(), "Two bedrooms?");
        assert_eq!(f.state.gateway.members(&f.room).await, 0);
    }

    #[tokio::test]
    async fn should_disconnect_when_stream_ends() {
        let f = fixture().await;
        let frames = stream::iter(vec![text(&format!(
            r#"{{"type":"join_room","conversationId":"{}"}}"#,
            f.room
        ))]);

        tokio::time::timeout(
            Duration::from_secs(5),
            serve(f.agent, sink::drain(), frames, f.dispatcher.clone()),
        )
        .await
        .unwrap();

        assert_eq!(f.state.gateway.members(&f.room).await, 0);
    }
}
