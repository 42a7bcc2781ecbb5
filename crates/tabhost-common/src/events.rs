use tokio::sync::broadcast;

/// Typed fan-out bus. Every current subscriber sees every event; a
/// subscriber that drops its receiver mid-dispatch simply stops receiving.
#[derive(Debug)]
pub struct EventBus<T: Clone> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: T) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        One,
        Two(u32),
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(Ping::One);

        assert_eq!(rx.recv().await.unwrap(), Ping::One);
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Ping::Two(5));

        assert_eq!(rx1.recv().await.unwrap(), Ping::Two(5));
        assert_eq!(rx2.recv().await.unwrap(), Ping::Two(5));
    }

    #[test]
    fn publish_returns_zero_with_no_subscribers() {
        let bus: EventBus<Ping> = EventBus::new(16);
        assert_eq!(bus.publish(Ping::One), 0);
    }

    #[tokio::test]
    async fn detached_subscriber_does_not_block_others() {
        let bus = EventBus::new(16);
        let rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        drop(rx1);

        assert_eq!(bus.publish(Ping::One), 1);
        assert_eq!(rx2.recv().await.unwrap(), Ping::One);
    }

    #[tokio::test]
    async fn clones_share_subscribers() {
        let bus = EventBus::new(16);
        let other = bus.clone();
        let mut rx = bus.subscribe();

        other.publish(Ping::Two(1));
        assert_eq!(rx.recv().await.unwrap(), Ping::Two(1));
        assert_eq!(other.subscriber_count(), 1);
    }
}
