use crate::AccessToken;
use tokio::sync::mpsc;

/// A live stream of access tokens
///
/// Obtained from [`TokenCast::subscribe`](crate::TokenCast::subscribe). Each
/// token is delivered once, in the order the engine published it. Dropping the
/// subscription unsubscribes.
#[derive(Debug)]
pub struct TokenSubscription {
    rx: mpsc::UnboundedReceiver<AccessToken>,
}

impl TokenSubscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<AccessToken>) -> Self {
        Self { rx }
    }

    /// Waits for the next token
    ///
    /// Returns `None` once the token cast has been shut down and every
    /// already-published token has been received.
    pub async fn next(&mut self) -> Option<AccessToken> {
        self.rx.recv().await
    }

    /// Takes the next token if one has already been published
    pub fn try_next(&mut self) -> Option<AccessToken> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<AccessToken>,
}

/// Fan-out of published tokens to subscribers, in attachment order
#[derive(Debug, Default)]
pub(crate) struct BroadcastChannel {
    subscribers: Vec<Subscriber>,
    attached: u64,
}

impl BroadcastChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber and returns its attachment id
    ///
    /// Ids count every attachment ever made and are never reused.
    pub(crate) fn attach(&mut self, tx: mpsc::UnboundedSender<AccessToken>) -> u64 {
        self.subscribers.retain(|s| !s.tx.is_closed());
        self.attached += 1;
        let id = self.attached;
        self.subscribers.push(Subscriber { id, tx });
        id
    }

    /// Total number of attachments so far
    pub(crate) fn attached(&self) -> u64 {
        self.attached
    }

    /// Whether anyone is still listening, forgetting those who left
    pub(crate) fn has_subscribers(&mut self) -> bool {
        self.subscribers.retain(|s| !s.tx.is_closed());
        !self.subscribers.is_empty()
    }

    /// Sends `token` to every subscriber, returning how many received it
    pub(crate) fn publish(&mut self, token: &AccessToken) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|s| {
            if s.tx.send(token.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                tracing::trace!(subscriber = s.id, "subscriber went away");
                false
            }
        });
        tracing::trace!(delivered, "published token");
        delivered
    }

    /// Sends `token` to a single subscriber
    pub(crate) fn replay(&mut self, id: u64, token: &AccessToken) -> bool {
        match self.subscribers.iter().position(|s| s.id == id) {
            Some(idx) => {
                if self.subscribers[idx].tx.send(token.clone()).is_ok() {
                    tracing::trace!(subscriber = id, "replayed cached token");
                    true
                } else {
                    self.subscribers.remove(idx);
                    false
                }
            }
            None => false,
        }
    }

    /// Drops every subscriber, ending their streams
    pub(crate) fn close(&mut self) {
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribe(channel: &mut BroadcastChannel) -> (u64, TokenSubscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (channel.attach(tx), TokenSubscription::new(rx))
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let mut channel = BroadcastChannel::new();
        let (_, mut a) = subscribe(&mut channel);
        let (_, mut b) = subscribe(&mut channel);

        let delivered = channel.publish(&AccessToken::from_static("T1"));

        assert_eq!(delivered, 2);
        assert_eq!(a.try_next().unwrap().as_str(), "T1");
        assert_eq!(b.try_next().unwrap().as_str(), "T1");
        assert!(a.try_next().is_none());
    }

    #[test]
    fn replay_targets_one_subscriber() {
        let mut channel = BroadcastChannel::new();
        let (_, mut a) = subscribe(&mut channel);
        let (id_b, mut b) = subscribe(&mut channel);

        assert!(channel.replay(id_b, &AccessToken::from_static("T1")));

        assert!(a.try_next().is_none());
        assert_eq!(b.try_next().unwrap().as_str(), "T1");
    }

    #[test]
    fn dropped_subscribers_are_forgotten_but_ids_keep_counting() {
        let mut channel = BroadcastChannel::new();
        let (_, a) = subscribe(&mut channel);
        drop(a);
        assert!(!channel.has_subscribers());

        let (id, _b) = subscribe(&mut channel);
        assert_eq!(id, 2);
        assert_eq!(channel.attached(), 2);
        assert_eq!(channel.publish(&AccessToken::from_static("T1")), 1);
    }

    #[test]
    fn attaching_forgets_subscribers_that_left() {
        let mut channel = BroadcastChannel::new();
        let (id_a, a) = subscribe(&mut channel);
        assert!(channel.replay(id_a, &AccessToken::from_static("T1")));
        drop(a);

        let (_, _b) = subscribe(&mut channel);

        assert_eq!(channel.subscribers.len(), 1);
        assert_eq!(channel.subscribers[0].id, 2);
    }

    #[test]
    fn tokens_arrive_in_publish_order() {
        let mut channel = BroadcastChannel::new();
        let (_, mut a) = subscribe(&mut channel);

        channel.publish(&AccessToken::from_static("T1"));
        channel.publish(&AccessToken::from_static("T2"));

        assert_eq!(a.try_next().unwrap().as_str(), "T1");
        assert_eq!(a.try_next().unwrap().as_str(), "T2");
    }

    #[tokio::test]
    async fn close_ends_streams() {
        let mut channel = BroadcastChannel::new();
        let (_, mut a) = subscribe(&mut channel);
        channel.publish(&AccessToken::from_static("T1"));
        channel.close();

        assert_eq!(a.next().await.unwrap().as_str(), "T1");
        assert!(a.next().await.is_none());
    }
}
