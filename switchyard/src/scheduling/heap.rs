//! The per-thread run queue: a 4-ary min-heap keyed on task pass.
//!
//! A wide heap trades a little comparison work for fewer levels, which wins
//! when most operations are sift-downs of the just-fired top task. The heap
//! maintains each task's heap index as entries move, so pending-queue
//! processing can remove an arbitrary task without a search.

use std::sync::Arc;

use super::{pass_gt, Task, NO_THREAD};

const ARITY: usize = 4;

/// A 4-ary min-heap of tasks ordered by pass.
pub struct TaskHeap {
    thread_id: i32,
    tasks: Vec<Arc<Task>>,
}

impl TaskHeap {
    /// Creates an empty heap owned by thread `thread_id`.
    pub fn new(thread_id: i32) -> Self {
        TaskHeap {
            thread_id,
            tasks: Vec::new(),
        }
    }

    /// Number of tasks on the heap.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the heap is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The smallest pass on the heap.
    pub fn min_pass(&self) -> Option<u32> {
        self.tasks.first().map(|t| t.pass())
    }

    /// The task with the smallest pass.
    pub fn peek(&self) -> Option<&Arc<Task>> {
        self.tasks.first()
    }

    /// Inserts a task, marking it hosted here. Returns false when the task
    /// already sits on a heap.
    pub fn insert(&mut self, task: Arc<Task>) -> bool {
        if task.heap_index() >= 0 {
            return false;
        }
        task.set_host(self.thread_id);
        let index = self.tasks.len();
        self.tasks.push(task);
        self.tasks[index].set_heap_index(index as isize);
        self.sift_up(index);
        true
    }

    /// Removes and returns the task with the smallest pass.
    pub fn pop(&mut self) -> Option<Arc<Task>> {
        if self.tasks.is_empty() {
            return None;
        }
        let top = self.tasks.swap_remove(0);
        top.set_heap_index(-1);
        top.set_host(NO_THREAD);
        if !self.tasks.is_empty() {
            self.tasks[0].set_heap_index(0);
            self.sift_down(0);
        }
        Some(top)
    }

    /// Removes `task` wherever it sits, if it is hosted on this heap.
    pub fn remove(&mut self, task: &Task) -> bool {
        let index = task.heap_index();
        if task.host() != self.thread_id || index < 0 {
            return false;
        }
        let index = index as usize;
        debug_assert!(std::ptr::eq(self.tasks[index].as_ref(), task));
        let removed = self.tasks.swap_remove(index);
        removed.set_heap_index(-1);
        removed.set_host(NO_THREAD);
        if index < self.tasks.len() {
            self.tasks[index].set_heap_index(index as isize);
            self.sift_down(index);
            self.sift_up(index);
        }
        true
    }

    fn place(&mut self, index: usize, task: Arc<Task>) {
        task.set_heap_index(index as isize);
        self.tasks[index] = task;
    }

    fn sift_up(&mut self, mut index: usize) {
        let task = Arc::clone(&self.tasks[index]);
        let pass = task.pass();
        while index > 0 {
            let parent = (index - 1) / ARITY;
            if !pass_gt(self.tasks[parent].pass(), pass) {
                break;
            }
            let p = Arc::clone(&self.tasks[parent]);
            self.place(index, p);
            index = parent;
        }
        self.place(index, task);
    }

    fn sift_down(&mut self, mut index: usize) {
        let task = Arc::clone(&self.tasks[index]);
        let pass = task.pass();
        loop {
            let first_child = index * ARITY + 1;
            if first_child >= self.tasks.len() {
                break;
            }
            let last_child = (first_child + ARITY).min(self.tasks.len());
            let mut smallest = first_child;
            for child in first_child + 1..last_child {
                if pass_gt(self.tasks[smallest].pass(), self.tasks[child].pass()) {
                    smallest = child;
                }
            }
            if !pass_gt(pass, self.tasks[smallest].pass()) {
                break;
            }
            let c = Arc::clone(&self.tasks[smallest]);
            self.place(index, c);
            index = smallest;
        }
        self.place(index, task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_pass(pass: u32) -> Arc<Task> {
        let task = Task::for_callback(0, |_| true);
        task.set_pass(pass);
        task
    }

    #[test]
    fn orders_by_pass() {
        let mut heap = TaskHeap::new(0);
        for pass in [50, 10, 40, 20, 30, 60, 5] {
            assert!(heap.insert(task_with_pass(pass)));
        }
        let mut seen = Vec::new();
        while let Some(task) = heap.pop() {
            seen.push(task.pass());
        }
        assert_eq!(seen, vec![5, 10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn maintains_indices() {
        let mut heap = TaskHeap::new(0);
        let tasks: Vec<_> = (0..20).map(|i| task_with_pass(100 - i)).collect();
        for t in &tasks {
            heap.insert(Arc::clone(t));
        }
        for t in &tasks {
            let idx = t.heap_index();
            assert!(idx >= 0 && (idx as usize) < heap.len());
            assert_eq!(t.host(), 0);
        }
        // Double insertion is refused while hosted.
        assert!(!heap.insert(Arc::clone(&tasks[3])));
    }

    #[test]
    fn removes_arbitrary_entries() {
        let mut heap = TaskHeap::new(0);
        let tasks: Vec<_> = (0..10).map(|i| task_with_pass(i * 10)).collect();
        for t in &tasks {
            heap.insert(Arc::clone(t));
        }
        assert!(heap.remove(&tasks[4]));
        assert!(!heap.remove(&tasks[4]));
        assert_eq!(tasks[4].heap_index(), -1);
        let mut seen = Vec::new();
        while let Some(task) = heap.pop() {
            seen.push(task.pass());
        }
        assert_eq!(seen, vec![0, 10, 20, 30, 50, 60, 70, 80, 90]);
    }

    #[test]
    fn wraparound_passes_stay_ordered() {
        let mut heap = TaskHeap::new(0);
        heap.insert(task_with_pass(u32::MAX - 10));
        heap.insert(task_with_pass(5));
        // The pre-wrap pass is "smaller" than the post-wrap pass.
        assert_eq!(heap.pop().unwrap().pass(), u32::MAX - 10);
        assert_eq!(heap.pop().unwrap().pass(), 5);
    }
}
