use std::time::Duration;

pub const BOOKING_REQUESTS: &str = "booking_requests";
pub const BOOKING_RETRY: &str = "booking_retry";
pub const BOOKING_NOTIFICATIONS: &str = "booking_notifications";

/// How long a message waits in a retry queue before it is dead-lettered back
pub const RETRY_DELAY: Duration = Duration::from_millis(10_000);

/// Where a queue sends expired or rejected messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub exchange: String,
    pub routing_key: String,
}

impl DeadLetter {
    /// Dead-letter straight into `queue` through the default exchange
    pub fn to_queue(queue: &str) -> Self {
        DeadLetter {
            exchange: String::new(),
            routing_key: queue.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub message_ttl: Option<Duration>,
    pub dead_letter: Option<DeadLetter>,
}

impl QueueSpec {
    pub fn durable(name: &str) -> Self {
        QueueSpec {
            name: name.to_string(),
            message_ttl: None,
            dead_letter: None,
        }
    }

    /// A parking queue whose messages expire after `delay` and return to `target`
    pub fn delay(name: &str, target: &str, delay: Duration) -> Self {
        QueueSpec {
            name: name.to_string(),
            message_ttl: Some(delay),
            dead_letter: Some(DeadLetter::to_queue(target)),
        }
    }

    pub fn dead_lettering_to(mut self, target: &str) -> Self {
        self.dead_letter = Some(DeadLetter::to_queue(target));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
}

/// Queues owned by one notification consumer group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQueues {
    pub queue: String,
    pub retry_queue: String,
    pub dead_queue: String,
    pub retry_delay: Duration,
}

impl NotificationQueues {
    pub fn named(queue: &str) -> Self {
        NotificationQueues {
            queue: queue.to_string(),
            retry_queue: format!("{queue}_retry"),
            dead_queue: format!("{queue}_dead"),
            retry_delay: RETRY_DELAY,
        }
    }
}

/// Durable entities a service declares every time it (re)connects.
///
/// Declarations are idempotent on the broker side, so the whole set is replayed
/// after each reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub fanout_exchanges: Vec<String>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<Binding>,
}

impl Topology {
    /// Request queue, its retry queue and the outcome exchange
    pub fn booking() -> Self {
        Topology {
            fanout_exchanges: vec![BOOKING_NOTIFICATIONS.to_string()],
            queues: vec![
                QueueSpec::durable(BOOKING_REQUESTS),
                QueueSpec::delay(BOOKING_RETRY, BOOKING_REQUESTS, RETRY_DELAY),
            ],
            bindings: Vec::new(),
        }
    }

    /// Adds a consumer group on the outcome exchange with its own retry and dead-letter queues
    pub fn with_notification_consumer(mut self, queues: &NotificationQueues) -> Self {
        self.queues.push(QueueSpec::durable(&queues.dead_queue));
        self.queues
            .push(QueueSpec::durable(&queues.queue).dead_lettering_to(&queues.dead_queue));
        self.queues.push(QueueSpec::delay(
            &queues.retry_queue,
            &queues.queue,
            queues.retry_delay,
        ));
        self.bindings.push(Binding {
            queue: queues.queue.clone(),
            exchange: BOOKING_NOTIFICATIONS.to_string(),
        });
        self
    }
}
