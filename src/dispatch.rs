//! Reply correlation for in-flight calls.
//!
//! The broker identifies a reply only by its method kind on a channel, so a
//! call declares up front which kinds may answer it. The registry tracks
//! those declared interests and records matching arrivals in arrival order;
//! each waiting call then consumes the earliest recorded reply among its own
//! acceptable kinds. Two calls on one channel with disjoint kind sets can
//! therefore wait back to back without ever seeing each other's replies.
//!
//! Interests are reference counted rather than deduplicated: registering the
//! same kind twice for two concurrent calls is the caller's problem, exactly
//! one of them will win each recorded reply.

use std::collections::{HashMap, VecDeque};

use crate::method::{Content, Method, MethodKind};

/// A recorded reply waiting for its call to consume it.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Reply {
    /// The method the broker answered with.
    pub(crate) method: Method,
    /// Content attached to the reply, for kinds that carry one.
    pub(crate) content: Option<Content>,
}

/// Per-connection correlation registry.
#[derive(Default)]
pub(crate) struct Dispatch {
    interests: HashMap<(u16, MethodKind), u32>,
    replies: HashMap<u16, VecDeque<Reply>>,
}

impl Dispatch {
    /// Declare that a call on `channel` will consume replies of `kinds`.
    pub(crate) fn register(&mut self, channel: u16, kinds: &[MethodKind]) {
        for &kind in kinds {
            *self.interests.entry((channel, kind)).or_insert(0) += 1;
        }
    }

    /// Withdraw a call's interests and drop recorded replies nobody else
    /// wants, so a finished call leaves no residue behind.
    pub(crate) fn deregister(&mut self, channel: u16, kinds: &[MethodKind]) {
        for &kind in kinds {
            let Some(count) = self.interests.get_mut(&(channel, kind)) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.interests.remove(&(channel, kind));
                if let Some(queue) = self.replies.get_mut(&channel) {
                    queue.retain(|reply| reply.method.kind() != kind);
                }
            }
        }
        if self.replies.get(&channel).is_some_and(VecDeque::is_empty) {
            self.replies.remove(&channel);
        }
    }

    /// Offer an inbound method to the registry.
    ///
    /// Records it for a waiting call when an interest matches and returns
    /// `None`; otherwise hands it back untouched for the connection to route
    /// as an unsolicited event.
    pub(crate) fn offer(
        &mut self,
        channel: u16,
        method: Method,
        content: Option<Content>,
    ) -> Option<(Method, Option<Content>)> {
        if self.interests.contains_key(&(channel, method.kind())) {
            self.replies
                .entry(channel)
                .or_default()
                .push_back(Reply { method, content });
            None
        } else {
            Some((method, content))
        }
    }

    /// Consume the earliest recorded reply on `channel` whose kind is in
    /// `kinds`, if one has arrived.
    pub(crate) fn take_first(&mut self, channel: u16, kinds: &[MethodKind]) -> Option<Reply> {
        let queue = self.replies.get_mut(&channel)?;
        let position = queue
            .iter()
            .position(|reply| kinds.contains(&reply.method.kind()))?;
        queue.remove(position)
    }

    /// Drop every interest and recorded reply for `channel`.
    ///
    /// Used when a channel dies with a call still in flight; the call's wait
    /// loop notices the closed state, not a reply.
    pub(crate) fn forget_channel(&mut self, channel: u16) {
        self.interests.retain(|&(ch, _), _| ch != channel);
        self.replies.remove(&channel);
    }

    /// Whether any interest is registered for `channel`.
    #[cfg(test)]
    pub(crate) fn has_interests(&self, channel: u16) -> bool {
        self.interests.keys().any(|&(ch, _)| ch == channel)
    }

    /// Number of recorded replies pending on `channel`.
    #[cfg(test)]
    pub(crate) fn recorded(&self, channel: u16) -> usize {
        self.replies.get(&channel).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Close, QueueDeclareOk};

    #[test]
    fn claims_only_registered_kinds_on_the_registered_channel() {
        let mut dispatch = Dispatch::default();
        dispatch.register(1, &[MethodKind::QueueDeclareOk]);

        let claimed = dispatch.offer(1, Method::QueueDeclareOk(QueueDeclareOk::default()), None);
        assert!(claimed.is_none());
        assert_eq!(dispatch.recorded(1), 1);

        let handed_back =
            dispatch.offer(2, Method::QueueDeclareOk(QueueDeclareOk::default()), None);
        assert!(handed_back.is_some());
        assert_eq!(dispatch.recorded(2), 0);
    }

    #[test]
    fn take_first_returns_the_earliest_acceptable_reply() {
        let mut dispatch = Dispatch::default();
        dispatch.register(1, &[MethodKind::BasicQosOk, MethodKind::ChannelCloseOk]);
        assert!(dispatch.offer(1, Method::BasicQosOk, None).is_none());
        assert!(dispatch.offer(1, Method::ChannelCloseOk, None).is_none());

        let first = dispatch
            .take_first(1, &[MethodKind::BasicQosOk, MethodKind::ChannelCloseOk])
            .map(|reply| reply.method);
        assert_eq!(first, Some(Method::BasicQosOk));
    }

    #[test]
    fn disjoint_calls_on_one_channel_never_cross() {
        let mut dispatch = Dispatch::default();
        dispatch.register(1, &[MethodKind::QueueDeclareOk]);
        dispatch.register(1, &[MethodKind::BasicQosOk]);
        assert!(dispatch.offer(1, Method::BasicQosOk, None).is_none());
        assert!(
            dispatch
                .offer(1, Method::QueueDeclareOk(QueueDeclareOk::default()), None)
                .is_none()
        );

        let declare = dispatch.take_first(1, &[MethodKind::QueueDeclareOk]);
        assert_eq!(
            declare.map(|reply| reply.method.kind()),
            Some(MethodKind::QueueDeclareOk)
        );
        let qos = dispatch.take_first(1, &[MethodKind::BasicQosOk]);
        assert_eq!(qos.map(|reply| reply.method.kind()), Some(MethodKind::BasicQosOk));
    }

    #[test]
    fn deregister_leaves_no_residue_for_a_finished_call() {
        let mut dispatch = Dispatch::default();
        let kinds = [MethodKind::BasicAck, MethodKind::BasicNack];
        dispatch.register(1, &kinds);
        assert!(
            dispatch
                .offer(1, Method::BasicAck(crate::method::BasicAck::default()), None)
                .is_none()
        );
        assert!(
            dispatch
                .offer(1, Method::BasicNack(crate::method::BasicNack::default()), None)
                .is_none()
        );

        let won = dispatch.take_first(1, &kinds);
        assert!(won.is_some());
        dispatch.deregister(1, &kinds);

        assert!(!dispatch.has_interests(1));
        assert_eq!(dispatch.recorded(1), 0);
    }

    #[test]
    fn deregister_keeps_replies_another_call_still_wants() {
        let mut dispatch = Dispatch::default();
        dispatch.register(1, &[MethodKind::ChannelCloseOk]);
        dispatch.register(1, &[MethodKind::ChannelCloseOk]);
        assert!(dispatch.offer(1, Method::ChannelCloseOk, None).is_none());

        dispatch.deregister(1, &[MethodKind::ChannelCloseOk]);
        assert_eq!(dispatch.recorded(1), 1);
        assert!(dispatch.has_interests(1));

        dispatch.deregister(1, &[MethodKind::ChannelCloseOk]);
        assert_eq!(dispatch.recorded(1), 0);
    }

    #[test]
    fn unclaimed_close_is_handed_back_for_lifecycle_handling() {
        let mut dispatch = Dispatch::default();
        let handed_back = dispatch.offer(
            3,
            Method::ChannelClose(Close::new(406, "precondition failed")),
            None,
        );
        assert_eq!(
            handed_back.map(|(method, _)| method.kind()),
            Some(MethodKind::ChannelClose)
        );
    }

    #[test]
    fn forget_channel_clears_interests_and_replies_together() {
        let mut dispatch = Dispatch::default();
        dispatch.register(3, &[MethodKind::ChannelCloseOk]);
        assert!(dispatch.offer(3, Method::ChannelCloseOk, None).is_none());

        dispatch.forget_channel(3);
        assert!(!dispatch.has_interests(3));
        assert_eq!(dispatch.recorded(3), 0);
    }
}
