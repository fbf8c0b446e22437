// Индикатор "печатает"
//
// TypingTracker - сторона получателя: чужой индикатор гаснет сам через окно
// `typing_expiry_ms`, даже если кадр `is_typing=false` не пришел.
// TypingDebouncer - сторона отправителя: превращает нажатия клавиш в редкие
// кадры `typing`. Таймера у отправителя нет, сброс только явный.

use crate::state::models::UserId;
use std::collections::HashMap;

/// Состояние набора текста собеседниками
///
/// Хранит дедлайны, а не таймеры: просроченная запись читается как `false`
/// без всякого callback'а, поэтому "осиротевших" таймеров не бывает.
#[derive(Debug, Clone)]
pub struct TypingTracker {
    expiry_ms: u64,
    deadlines: HashMap<UserId, u64>,
}

impl TypingTracker {
    pub fn new(expiry_ms: u64) -> Self {
        Self {
            expiry_ms,
            deadlines: HashMap::new(),
        }
    }

    /// Применить кадр `typing`. Возвращает true, если видимое состояние изменилось.
    ///
    /// Повторный `true` до истечения окна перезапускает его, а не продлевает.
    pub fn set(&mut self, peer_id: UserId, is_typing: bool, now_ms: u64) -> bool {
        let was_typing = self.is_typing(peer_id, now_ms);
        if is_typing {
            self.deadlines.insert(peer_id, now_ms + self.expiry_ms);
        } else {
            self.deadlines.remove(&peer_id);
        }
        was_typing != is_typing
    }

    pub fn is_typing(&self, peer_id: UserId, now_ms: u64) -> bool {
        self.deadlines
            .get(&peer_id)
            .map_or(false, |deadline| now_ms < *deadline)
    }

    /// Убрать просроченные записи и вернуть собеседников, чей индикатор погас
    pub fn expire_due(&mut self, now_ms: u64) -> Vec<UserId> {
        let mut expired: Vec<UserId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(peer_id, _)| *peer_id)
            .collect();
        expired.sort_unstable();

        for peer_id in &expired {
            self.deadlines.remove(peer_id);
        }
        expired
    }

    /// Ближайший дедлайн, к которому стоит запланировать `expire_due`
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.values().copied().min()
    }

    pub fn typing_peers(&self, now_ms: u64) -> Vec<UserId> {
        let mut peers: Vec<UserId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now_ms < **deadline)
            .map(|(peer_id, _)| *peer_id)
            .collect();
        peers.sort_unstable();
        peers
    }

    /// Забыть собеседника (закрытие беседы). Возвращает true, если запись была.
    pub fn forget(&mut self, peer_id: UserId) -> bool {
        self.deadlines.remove(&peer_id).is_some()
    }

    /// Сбросить все записи (logout). Возвращает тех, кто печатал.
    pub fn clear(&mut self, now_ms: u64) -> Vec<UserId> {
        let peers = self.typing_peers(now_ms);
        self.deadlines.clear();
        peers
    }
}

/// Превращает изменения поля ввода в кадры `typing` отправителя
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    refresh_ms: u64,
    announced: bool,
    last_sent_ms: u64,
}

impl TypingDebouncer {
    pub fn new(refresh_ms: u64) -> Self {
        Self {
            refresh_ms,
            announced: false,
            last_sent_ms: 0,
        }
    }

    /// Поле ввода изменилось. `Some(flag)` - нужно отправить `typing=flag`.
    ///
    /// Пока пользователь печатает, `true` повторяется не чаще `refresh_ms`,
    /// чтобы окно у получателя не истекло посреди набора.
    pub fn on_input(&mut self, content: &str, now_ms: u64) -> Option<bool> {
        if content.is_empty() {
            return self.stop();
        }

        let stale = now_ms.saturating_sub(self.last_sent_ms) >= self.refresh_ms;
        if !self.announced || stale {
            self.announced = true;
            self.last_sent_ms = now_ms;
            return Some(true);
        }
        None
    }

    /// Сообщение отправлено: собственный индикатор гасится явно
    pub fn on_sent(&mut self) -> Option<bool> {
        self.stop()
    }

    fn stop(&mut self) -> Option<bool> {
        if self.announced {
            self.announced = false;
            Some(false)
        } else {
            None
        }
    }

    /// Забыть объявленный набор без кадра (кадр не ушел или сессия закрыта)
    pub fn reset(&mut self) {
        self.announced = false;
        self.last_sent_ms = 0;
    }

    pub fn is_announced(&self) -> bool {
        self.announced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_000_000;

    #[test]
    fn test_typing_expires_without_frame() {
        let mut tracker = TypingTracker::new(3000);
        assert!(tracker.set(42, true, T));

        assert!(tracker.is_typing(42, T + 2999));
        assert!(!tracker.is_typing(42, T + 3000));
        assert_eq!(tracker.expire_due(T + 3000), vec![42]);
        assert!(tracker.next_deadline().is_none());
    }

    #[test]
    fn test_typing_restart_not_accumulate() {
        let mut tracker = TypingTracker::new(3000);
        tracker.set(42, true, T);
        // второй кадр виден как "без изменений"
        assert!(!tracker.set(42, true, T + 1000));

        assert!(tracker.is_typing(42, T + 3000));
        assert!(tracker.expire_due(T + 3000).is_empty());
        assert!(tracker.is_typing(42, T + 3999));
        assert!(!tracker.is_typing(42, T + 4000));
        assert_eq!(tracker.next_deadline(), Some(T + 4000));
    }

    #[test]
    fn test_typing_explicit_stop() {
        let mut tracker = TypingTracker::new(3000);
        tracker.set(7, true, T);
        tracker.set(8, true, T + 10);
        assert!(tracker.set(7, false, T + 20));
        assert!(!tracker.set(7, false, T + 30));
        assert_eq!(tracker.typing_peers(T + 40), vec![8]);
        assert_eq!(tracker.clear(T + 40), vec![8]);
        assert!(!tracker.forget(8));
        assert!(tracker.typing_peers(T + 40).is_empty());
    }

    #[test]
    fn test_debouncer_edges() {
        let mut debouncer = TypingDebouncer::new(2000);
        assert_eq!(debouncer.on_input("h", T), Some(true));
        assert_eq!(debouncer.on_input("he", T + 100), None);
        assert_eq!(debouncer.on_input("hel", T + 2100), Some(true));
        assert_eq!(debouncer.on_input("", T + 2200), Some(false));
        assert_eq!(debouncer.on_input("", T + 2300), None);
    }

    #[test]
    fn test_debouncer_cleared_on_send() {
        let mut debouncer = TypingDebouncer::new(2000);
        assert_eq!(debouncer.on_sent(), None);
        debouncer.on_input("hello", T);
        assert!(debouncer.is_announced());
        assert_eq!(debouncer.on_sent(), Some(false));
        assert!(!debouncer.is_announced());
        // после отправки новый набор снова объявляется сразу
        assert_eq!(debouncer.on_input("x", T + 10), Some(true));
    }

    #[test]
    fn test_debouncer_reset_reannounces() {
        let mut debouncer = TypingDebouncer::new(2000);
        assert_eq!(debouncer.on_input("h", T), Some(true));
        debouncer.reset();
        assert!(!debouncer.is_announced());
        assert_eq!(debouncer.on_input("hi", T + 100), Some(true));
    }
}
