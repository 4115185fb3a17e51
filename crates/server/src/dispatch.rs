//! Maps received messages onto [`ServerModule`] verbs.
//!
//! Every verb gets a [`Completion`] whose callback queues the encoded reply
//! on an unbounded channel owned by the reactor. Synchronous completions are
//! flushed right after dispatch; deferred ones wake the reactor through the
//! same channel.

use tokio::sync::mpsc;

use corelib::{Completion, ProcId, ServerModule, Status, Verb};
use wire::{Message, Reply, ReplyBody, Request};

/// A reply waiting to be written to the peer.
#[derive(Debug)]
pub struct Outgoing {
    pub tag: u32,
    pub verb: Option<Verb>,
    pub reply: Reply,
}

#[derive(Clone, Debug)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Dispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn queue(&self, outgoing: Outgoing) {
        if self.tx.send(outgoing).is_err() {
            tracing::debug!("reply channel closed, dropping reply");
        }
    }

    fn completion<T>(&self, verb: Verb, tag: u32) -> Completion<T>
    where
        T: Default + Into<ReplyBody> + 'static,
    {
        let tx = self.tx.clone();
        Completion::new(verb.name(), move |status, value: T| {
            let outgoing = Outgoing {
                tag,
                verb: Some(verb),
                reply: Reply::new(status, value),
            };
            if tx.send(outgoing).is_err() {
                tracing::debug!(verb = verb.name(), "reply channel closed, dropping reply");
            }
        })
    }

    /// Decode `msg` and hand it to `module` on behalf of `requester`.
    ///
    /// A payload that does not decode is answered with `BadParam`; it never
    /// affects the connection.
    pub fn dispatch<M>(&self, module: &mut M, requester: &ProcId, msg: Message)
    where
        M: ServerModule + ?Sized,
    {
        let Some(header) = msg.header().copied() else {
            tracing::warn!("dispatch of a message whose header was never fixed");
            return;
        };
        let tag = header.tag;

        let request = match Request::from_message(header.kind, msg.payload()) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(kind = %header.kind, tag, error = %err, "undecodable request");
                self.queue(Outgoing {
                    tag,
                    verb: header.kind.verb(),
                    reply: Reply::status_only(Status::BadParam),
                });
                return;
            }
        };

        tracing::trace!(kind = %header.kind, tag, requester = %requester, "dispatching");
        match request {
            Request::Finalize => module.finalized(requester, self.completion(Verb::Finalize, tag)),
            Request::Abort {
                status,
                message,
                procs,
            } => module.abort(
                requester,
                status,
                &message,
                &procs,
                self.completion(Verb::Abort, tag),
            ),
            Request::Fence {
                procs,
                barrier,
                collect,
                data,
            } => module.fence(
                &procs,
                barrier,
                collect,
                data,
                self.completion(Verb::Fence, tag),
            ),
            Request::StoreModex { scope, blob } => {
                let status = module.store_modex(requester, scope, blob);
                self.queue(Outgoing {
                    tag,
                    verb: Some(Verb::StoreModex),
                    reply: Reply::status_only(status),
                });
            }
            Request::DirectModex { target } => {
                module.direct_modex(&target, self.completion(Verb::DirectModex, tag))
            }
            Request::JobInfo => {
                let infos = module.job_info(requester);
                self.queue(Outgoing {
                    tag,
                    verb: Some(Verb::JobInfo),
                    reply: Reply::new(Status::Success, infos),
                });
            }
            Request::Publish {
                scope,
                persistence,
                infos,
            } => module.publish(
                requester,
                scope,
                persistence,
                infos,
                self.completion(Verb::Publish, tag),
            ),
            Request::Lookup { scope, wait, keys } => module.lookup(
                requester,
                scope,
                wait,
                keys,
                self.completion(Verb::Lookup, tag),
            ),
            Request::Unpublish { scope, keys } => module.unpublish(
                requester,
                scope,
                keys,
                self.completion(Verb::Unpublish, tag),
            ),
            Request::Spawn { apps } => {
                module.spawn(requester, apps, self.completion(Verb::Spawn, tag))
            }
            Request::Connect { procs } => {
                module.connect(&procs, self.completion(Verb::Connect, tag))
            }
            Request::Disconnect { procs } => {
                module.disconnect(&procs, self.completion(Verb::Disconnect, tag))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{HarnessModule, Info, Persistence, Scope, Value};

    fn requester() -> ProcId {
        ProcId::new("job", 0).unwrap()
    }

    fn run(module: &mut HarnessModule, request: Request, tag: u32) -> Outgoing {
        let (dispatcher, mut rx) = Dispatcher::new();
        dispatcher.dispatch(module, &requester(), request.to_message(tag).unwrap());
        rx.try_recv().expect("synchronous reply")
    }

    #[test]
    fn test_publish_then_lookup_replies() {
        let mut module = HarnessModule::default();
        let publish = Request::Publish {
            scope: Scope::Global,
            persistence: Persistence::Indefinite,
            infos: vec![Info::new("color", "red")],
        };
        let out = run(&mut module, publish, 1);
        assert_eq!(out.tag, 1);
        assert_eq!(out.reply.status, Status::Success);

        let lookup = Request::Lookup {
            scope: Scope::Global,
            wait: false,
            keys: vec!["color".into()],
        };
        let out = run(&mut module, lookup, 2);
        assert_eq!(out.reply.status, Status::Success);
        match out.reply.body {
            ReplyBody::Lookup(slots) => {
                assert_eq!(slots[0].as_ref().unwrap().value, Value::from("red"));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_spawn_returns_placeholder_namespace() {
        let mut module = HarnessModule::default();
        let out = run(&mut module, Request::Spawn { apps: Vec::new() }, 4);
        assert_eq!(out.reply.body, ReplyBody::Namespace("foobar".into()));
    }

    #[test]
    fn test_job_info_is_empty() {
        let mut module = HarnessModule::default();
        let out = run(&mut module, Request::JobInfo, 5);
        assert_eq!(out.reply.body, ReplyBody::JobInfo(Vec::new()));
    }

    #[test]
    fn test_undecodable_payload_gets_bad_param() {
        let mut module = HarnessModule::default();
        let (dispatcher, mut rx) = Dispatcher::new();
        let msg = Message::encode(wire::MessageType::Publish, 8, vec![0xff; 5]).unwrap();
        dispatcher.dispatch(&mut module, &requester(), msg);
        let out = rx.try_recv().unwrap();
        assert_eq!(out.tag, 8);
        assert_eq!(out.reply.status, Status::BadParam);
    }

    #[test]
    fn test_waited_lookup_replies_later() {
        let mut module = HarnessModule::default();
        let (dispatcher, mut rx) = Dispatcher::new();
        let lookup = Request::Lookup {
            scope: Scope::Global,
            wait: true,
            keys: vec!["k".into()],
        };
        dispatcher.dispatch(&mut module, &requester(), lookup.to_message(1).unwrap());
        assert!(rx.try_recv().is_err());

        let publish = Request::Publish {
            scope: Scope::Global,
            persistence: Persistence::Indefinite,
            infos: vec![Info::new("k", 1i64)],
        };
        dispatcher.dispatch(&mut module, &requester(), publish.to_message(2).unwrap());
        let mut tags: Vec<u32> = std::iter::from_fn(|| rx.try_recv().ok()).map(|o| o.tag).collect();
        tags.sort_unstable();
        assert_eq!(tags, vec![1, 2]);
    }
}
