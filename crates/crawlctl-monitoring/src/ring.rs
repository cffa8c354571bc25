//! Small bounded-`VecDeque` helpers shared by the monitor's ring buffers.

use std::collections::VecDeque;

pub fn push_bounded<T>(deque: &mut VecDeque<T>, item: T, capacity: usize) {
    deque.push_back(item);
    while deque.len() > capacity {
        deque.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut deque = VecDeque::new();
        for i in 0..5 {
            push_bounded(&mut deque, i, 3);
        }
        assert_eq!(deque.into_iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }
}
