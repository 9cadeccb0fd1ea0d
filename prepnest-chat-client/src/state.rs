use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::types::{ChatMessage, ConversationSummary};

/// Load progress of one conversation view.
///
/// `LoadingOlder` keeps the tail of the list stable; only `Loading`
/// (page 0) replaces it wholesale once the page arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    LoadingOlder,
}

/// Per-conversation message list plus the bookkeeping the merge rules
/// need. `messages` is always oldest-first.
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub load_state: LoadState,
    pub messages: Vec<ChatMessage>,
    seen: HashSet<Uuid>,
    pub history_exhausted: bool,
    pub send_in_flight: bool,
}

impl Default for ConversationView {
    fn default() -> Self {
        Self {
            load_state: LoadState::Unloaded,
            messages: Vec::new(),
            seen: HashSet::new(),
            history_exhausted: false,
            send_in_flight: false,
        }
    }
}

impl ConversationView {
    pub fn contains(&self, message_id: Uuid) -> bool {
        self.seen.contains(&message_id)
    }
}

/// Inputs to the reducer: completed fetches and server-pushed events.
/// Everything the transport or HTTP layer observes funnels through here.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A history page arrived. `page_size` is the size that was requested,
    /// so a short page can be recognized as end-of-history.
    PageLoaded {
        conversation_id: Uuid,
        page: u32,
        page_size: usize,
        messages: Vec<ChatMessage>,
    },
    /// The in-flight page fetch failed; existing messages stay untouched.
    LoadFailed { conversation_id: Uuid },
    MessageCreated { message: ChatMessage },
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    MessageRead {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    },
    ConversationCreated { conversation: ConversationSummary },
    ConversationRemoved { conversation_id: Uuid },
}

/// The whole client-side chat state for one signed-in user.
#[derive(Debug, Clone)]
pub struct ChatState {
    pub self_id: Uuid,
    pub roster: Vec<ConversationSummary>,
    pub unread: HashMap<Uuid, bool>,
    pub active: Option<Uuid>,
    views: HashMap<Uuid, ConversationView>,
}

impl ChatState {
    pub fn new(self_id: Uuid) -> Self {
        Self {
            self_id,
            roster: Vec::new(),
            unread: HashMap::new(),
            active: None,
            views: HashMap::new(),
        }
    }

    pub fn view(&self, conversation_id: Uuid) -> Option<&ConversationView> {
        self.views.get(&conversation_id)
    }

    pub fn set_roster(&mut self, roster: Vec<ConversationSummary>) {
        self.roster = roster;
    }

    /// Switch the active conversation. Clears its unread flag and resets
    /// the view so the caller kicks off a page-0 fetch.
    pub fn open_conversation(&mut self, conversation_id: Uuid) {
        self.active = Some(conversation_id);
        self.unread.remove(&conversation_id);

        let send_in_flight = self
            .views
            .get(&conversation_id)
            .map(|v| v.send_in_flight)
            .unwrap_or(false);
        self.views.insert(
            conversation_id,
            ConversationView {
                load_state: LoadState::Loading,
                // An outstanding send survives the reset so its guard holds
                send_in_flight,
                ..ConversationView::default()
            },
        );
    }

    /// Request an older page for the active conversation. Returns false
    /// when the transition is not allowed (history exhausted, wrong
    /// state), meaning the caller must not fetch.
    pub fn begin_load_older(&mut self, conversation_id: Uuid) -> bool {
        let Some(view) = self.views.get_mut(&conversation_id) else {
            return false;
        };
        if view.history_exhausted || view.load_state != LoadState::Loaded {
            return false;
        }
        view.load_state = LoadState::LoadingOlder;
        true
    }

    /// Arm the send guard. Returns false while a previous send for this
    /// conversation is still outstanding.
    pub fn begin_send(&mut self, conversation_id: Uuid) -> bool {
        let view = self.views.entry(conversation_id).or_default();
        if view.send_in_flight {
            return false;
        }
        view.send_in_flight = true;
        true
    }

    /// The send completed; the echoed `new_message` event (or the REST
    /// response fed through `MessageCreated`) carries the actual message.
    pub fn send_acked(&mut self, conversation_id: Uuid) {
        if let Some(view) = self.views.get_mut(&conversation_id) {
            view.send_in_flight = false;
        }
    }

    /// The send failed. Releases the guard; the list is never touched
    /// because the reducer never fabricated an unacked message.
    pub fn send_failed(&mut self, conversation_id: Uuid) {
        if let Some(view) = self.views.get_mut(&conversation_id) {
            view.send_in_flight = false;
        }
    }

    pub fn apply(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::PageLoaded {
                conversation_id,
                page,
                page_size,
                messages,
            } => self.on_page_loaded(conversation_id, page, page_size, messages),
            ChatEvent::LoadFailed { conversation_id } => self.on_load_failed(conversation_id),
            ChatEvent::MessageCreated { message } => self.on_message_created(message),
            ChatEvent::MessageDeleted {
                conversation_id,
                message_id,
            } => self.on_message_deleted(conversation_id, message_id),
            ChatEvent::MessageRead {
                conversation_id,
                message_id,
                user_id,
            } => self.on_message_read(conversation_id, message_id, user_id),
            ChatEvent::ConversationCreated { conversation } => {
                self.on_conversation_created(conversation)
            }
            ChatEvent::ConversationRemoved { conversation_id } => {
                self.on_conversation_removed(conversation_id)
            }
        }
    }

    fn on_page_loaded(
        &mut self,
        conversation_id: Uuid,
        page: u32,
        page_size: usize,
        messages: Vec<ChatMessage>,
    ) {
        let view = self.views.entry(conversation_id).or_default();
        let short_page = messages.len() < page_size;

        if page == 0 {
            // Wholesale replace; the seen set restarts from this page
            view.seen = messages.iter().map(|m| m.id).collect();
            view.messages = messages;
        } else {
            // Older page: drop ids already present (a message can arrive
            // live between the initial load and this fetch), then prepend
            let fresh: Vec<ChatMessage> = messages
                .into_iter()
                .filter(|m| !view.seen.contains(&m.id))
                .collect();
            for m in &fresh {
                view.seen.insert(m.id);
            }
            let mut merged = fresh;
            merged.append(&mut view.messages);
            view.messages = merged;
        }

        if short_page {
            view.history_exhausted = true;
        }
        view.load_state = LoadState::Loaded;
    }

    fn on_load_failed(&mut self, conversation_id: Uuid) {
        let Some(view) = self.views.get_mut(&conversation_id) else {
            return;
        };
        // Fall back to the last stable state; the list was never touched
        view.load_state = if view.messages.is_empty() {
            LoadState::Unloaded
        } else {
            LoadState::Loaded
        };
    }

    fn on_message_created(&mut self, message: ChatMessage) {
        let conversation_id = message.conversation_id;

        if self.active == Some(conversation_id) {
            let view = self.views.entry(conversation_id).or_default();
            // The sender receives its own broadcast; seen-set dedup
            // absorbs the echo
            if view.seen.insert(message.id) {
                view.messages.push(message);
            }
        } else if message.sender_id != self.self_id {
            self.unread.insert(conversation_id, true);
        }
    }

    fn on_message_deleted(&mut self, conversation_id: Uuid, message_id: Uuid) {
        if let Some(view) = self.views.get_mut(&conversation_id) {
            view.messages.retain(|m| m.id != message_id);
            view.seen.remove(&message_id);
        }
    }

    fn on_message_read(&mut self, conversation_id: Uuid, message_id: Uuid, user_id: Uuid) {
        let Some(view) = self.views.get_mut(&conversation_id) else {
            return;
        };
        if let Some(message) = view.messages.iter_mut().find(|m| m.id == message_id) {
            if !message.read_by.contains(&user_id) {
                message.read_by.push(user_id);
            }
        }
    }

    /// Covers both the push event and the optimistic local add after the
    /// caller itself created the conversation: the first `new_message`
    /// for a just-created conversation must find it in the roster even
    /// if the room join has not completed yet.
    fn on_conversation_created(&mut self, conversation: ConversationSummary) {
        if !self.roster.iter().any(|c| c.id == conversation.id) {
            self.roster.insert(0, conversation);
        }
    }

    fn on_conversation_removed(&mut self, conversation_id: Uuid) {
        self.roster.retain(|c| c.id != conversation_id);
        self.unread.remove(&conversation_id);
        self.views.remove(&conversation_id);
        if self.active == Some(conversation_id) {
            self.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(conversation_id: Uuid, sender_id: Uuid) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: Some("hi".into()),
            media_url: None,
            media_type: None,
            created_at: Utc::now(),
            read_by: vec![sender_id],
        }
    }

    fn conv(id: Uuid) -> ConversationSummary {
        ConversationSummary {
            id,
            is_group: false,
            group_name: None,
            group_image_url: None,
            admin_id: None,
            last_message_at: None,
        }
    }

    fn loaded_state(conversation_id: Uuid, messages: Vec<ChatMessage>) -> ChatState {
        let mut state = ChatState::new(Uuid::new_v4());
        state.open_conversation(conversation_id);
        state.apply(ChatEvent::PageLoaded {
            conversation_id,
            page: 0,
            page_size: messages.len().max(1),
            messages,
        });
        state
    }

    #[test]
    fn page_zero_replaces_wholesale_and_resets_seen() {
        let conv_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let old = msg(conv_id, sender);
        let mut state = loaded_state(conv_id, vec![old.clone()]);

        let fresh = msg(conv_id, sender);
        state.apply(ChatEvent::PageLoaded {
            conversation_id: conv_id,
            page: 0,
            page_size: 20,
            messages: vec![fresh.clone()],
        });

        let view = state.view(conv_id).unwrap();
        assert_eq!(view.messages, vec![fresh.clone()]);
        assert!(!view.contains(old.id));
        assert!(view.contains(fresh.id));
        assert_eq!(view.load_state, LoadState::Loaded);
    }

    #[test]
    fn older_page_prepends_and_filters_duplicates() {
        let conv_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let current = msg(conv_id, sender);
        let mut state = loaded_state(conv_id, vec![current.clone()]);

        assert!(state.begin_load_older(conv_id));
        assert_eq!(state.view(conv_id).unwrap().load_state, LoadState::LoadingOlder);

        // Older page contains one genuinely-old message and a duplicate
        // of a message we already hold
        let older = msg(conv_id, sender);
        state.apply(ChatEvent::PageLoaded {
            conversation_id: conv_id,
            page: 1,
            page_size: 2,
            messages: vec![older.clone(), current.clone()],
        });

        let view = state.view(conv_id).unwrap();
        assert_eq!(view.messages, vec![older, current]);
        assert_eq!(view.load_state, LoadState::Loaded);
    }

    #[test]
    fn short_older_page_exhausts_history_and_suppresses_load_older() {
        let conv_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut state = loaded_state(conv_id, vec![msg(conv_id, sender)]);

        assert!(state.begin_load_older(conv_id));
        state.apply(ChatEvent::PageLoaded {
            conversation_id: conv_id,
            page: 1,
            page_size: 20,
            messages: vec![],
        });

        assert!(state.view(conv_id).unwrap().history_exhausted);
        assert!(!state.begin_load_older(conv_id));

        // Reopening the conversation clears the flag
        state.open_conversation(conv_id);
        assert!(!state.view(conv_id).unwrap().history_exhausted);
    }

    #[test]
    fn load_failed_leaves_messages_untouched() {
        let conv_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let existing = msg(conv_id, sender);
        let mut state = loaded_state(conv_id, vec![existing.clone()]);

        assert!(state.begin_load_older(conv_id));
        state.apply(ChatEvent::LoadFailed {
            conversation_id: conv_id,
        });

        let view = state.view(conv_id).unwrap();
        assert_eq!(view.messages, vec![existing]);
        assert_eq!(view.load_state, LoadState::Loaded);
    }

    #[test]
    fn load_failed_without_prior_data_returns_to_unloaded() {
        let conv_id = Uuid::new_v4();
        let mut state = ChatState::new(Uuid::new_v4());
        state.open_conversation(conv_id);

        state.apply(ChatEvent::LoadFailed {
            conversation_id: conv_id,
        });
        assert_eq!(state.view(conv_id).unwrap().load_state, LoadState::Unloaded);
    }

    #[test]
    fn live_message_appends_once_despite_echo() {
        let conv_id = Uuid::new_v4();
        let mut state = loaded_state(conv_id, vec![]);

        let message = msg(conv_id, state.self_id);
        state.apply(ChatEvent::MessageCreated {
            message: message.clone(),
        });
        // Sender's own broadcast arrives a second time
        state.apply(ChatEvent::MessageCreated { message });

        assert_eq!(state.view(conv_id).unwrap().messages.len(), 1);
    }

    #[test]
    fn inactive_conversation_flags_unread_except_for_self() {
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();
        let mut state = loaded_state(conv_a, vec![]);

        let other = Uuid::new_v4();
        state.apply(ChatEvent::MessageCreated {
            message: msg(conv_b, other),
        });
        assert_eq!(state.unread.get(&conv_b), Some(&true));

        // A self-sent message in another conversation never flags unread
        let conv_c = Uuid::new_v4();
        state.apply(ChatEvent::MessageCreated {
            message: msg(conv_c, state.self_id),
        });
        assert!(!state.unread.contains_key(&conv_c));
    }

    #[test]
    fn opening_a_conversation_clears_its_unread_flag() {
        let conv_id = Uuid::new_v4();
        let mut state = ChatState::new(Uuid::new_v4());
        state.unread.insert(conv_id, true);

        state.open_conversation(conv_id);
        assert!(!state.unread.contains_key(&conv_id));
        assert_eq!(state.view(conv_id).unwrap().load_state, LoadState::Loading);
    }

    #[test]
    fn deletion_removes_message_and_seen_entry() {
        let conv_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let message = msg(conv_id, sender);
        let mut state = loaded_state(conv_id, vec![message.clone()]);

        state.apply(ChatEvent::MessageDeleted {
            conversation_id: conv_id,
            message_id: message.id,
        });

        let view = state.view(conv_id).unwrap();
        assert!(view.messages.is_empty());
        assert!(!view.contains(message.id));

        // The same message can now reappear, e.g. from a stale page
        state.apply(ChatEvent::MessageCreated { message });
        assert_eq!(state.view(conv_id).unwrap().messages.len(), 1);
    }

    #[test]
    fn read_receipt_append_is_idempotent() {
        let conv_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let message = msg(conv_id, sender);
        let mut state = loaded_state(conv_id, vec![message.clone()]);

        let reader = Uuid::new_v4();
        for _ in 0..2 {
            state.apply(ChatEvent::MessageRead {
                conversation_id: conv_id,
                message_id: message.id,
                user_id: reader,
            });
        }

        let read_by = &state.view(conv_id).unwrap().messages[0].read_by;
        assert_eq!(read_by.iter().filter(|u| **u == reader).count(), 1);
    }

    #[test]
    fn send_guard_blocks_concurrent_sends() {
        let conv_id = Uuid::new_v4();
        let mut state = ChatState::new(Uuid::new_v4());

        assert!(state.begin_send(conv_id));
        assert!(!state.begin_send(conv_id));

        state.send_failed(conv_id);
        assert!(state.begin_send(conv_id));

        state.send_acked(conv_id);
        assert!(state.begin_send(conv_id));
    }

    #[test]
    fn send_guard_survives_reopening_the_conversation() {
        let conv_id = Uuid::new_v4();
        let mut state = ChatState::new(Uuid::new_v4());

        assert!(state.begin_send(conv_id));
        state.open_conversation(conv_id);
        assert!(!state.begin_send(conv_id));
    }

    #[test]
    fn self_created_conversation_lands_in_roster_before_join() {
        let conv_id = Uuid::new_v4();
        let mut state = ChatState::new(Uuid::new_v4());

        state.apply(ChatEvent::ConversationCreated {
            conversation: conv(conv_id),
        });
        // The push event for the same conversation is a no-op
        state.apply(ChatEvent::ConversationCreated {
            conversation: conv(conv_id),
        });

        assert_eq!(state.roster.len(), 1);
        assert_eq!(state.roster[0].id, conv_id);
    }

    #[test]
    fn removed_conversation_is_fully_forgotten() {
        let conv_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut state = loaded_state(conv_id, vec![msg(conv_id, sender)]);
        state.apply(ChatEvent::ConversationCreated {
            conversation: conv(conv_id),
        });

        state.apply(ChatEvent::ConversationRemoved {
            conversation_id: conv_id,
        });

        assert!(state.roster.is_empty());
        assert!(state.view(conv_id).is_none());
        assert_eq!(state.active, None);
    }
}
