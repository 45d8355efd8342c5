//! Thread-bound task queues.
//!
//! A [`TaskThread`] owns one OS thread that runs posted closures in FIFO
//! order. [`TaskRunner`] is the cheap, cloneable handle used to post work to
//! it and to ask whether the caller is already running on that thread.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use log::debug;

/// Unit of work accepted by a [`TaskRunner`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Quit,
}

thread_local! {
    static CURRENT: RefCell<Option<TaskRunner>> = const { RefCell::new(None) };
}

/// Handle for posting tasks onto a [`TaskThread`].
#[derive(Clone)]
pub struct TaskRunner {
    sender: Sender<Message>,
    thread: ThreadId,
    name: Arc<str>,
}

impl TaskRunner {
    /// Returns the runner driving the calling thread, if it is a task thread.
    pub fn current() -> Option<TaskRunner> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true when called from the thread this runner executes on.
    pub fn runs_tasks_on_current_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Queues `task` behind everything already posted.
    ///
    /// Returns false when the thread has shut down; the task is dropped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Message::Run(Box::new(task))).is_err() {
            debug!("task runner {} has stopped, dropping task", self.name);
            return false;
        }
        true
    }

    /// Blocks until every task posted before this call has run.
    ///
    /// Returns immediately when called on the runner's own thread.
    pub fn flush(&self) {
        if self.runs_tasks_on_current_thread() {
            return;
        }
        let (done, wait) = mpsc::channel();
        if self.post(move || {
            let _ = done.send(());
        }) {
            // Errors mean the thread died with the marker still queued.
            let _ = wait.recv();
        }
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.name)
            .field("thread", &self.thread)
            .finish()
    }
}

/// Owned task thread. Dropping it drains queued tasks and joins the thread.
#[derive(Debug)]
pub struct TaskThread {
    runner: TaskRunner,
    handle: Option<JoinHandle<()>>,
}

impl TaskThread {
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let name: Arc<str> = Arc::from(name);

        let thread_sender = sender.clone();
        let thread_name = Arc::clone(&name);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runner = TaskRunner {
                    sender: thread_sender,
                    thread: thread::current().id(),
                    name: thread_name,
                };
                CURRENT.with(|current| *current.borrow_mut() = Some(runner));
                run_tasks(receiver);
                CURRENT.with(|current| current.borrow_mut().take());
            })?;

        let runner = TaskRunner {
            sender,
            thread: handle.thread().id(),
            name,
        };
        Ok(Self {
            runner,
            handle: Some(handle),
        })
    }

    pub fn runner(&self) -> TaskRunner {
        self.runner.clone()
    }

    /// Runs the remaining queued tasks, then stops and joins the thread.
    ///
    /// Returns the panic payload if a task panicked.
    pub fn shutdown(mut self) -> thread::Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> thread::Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let _ = self.runner.sender.send(Message::Quit);
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        handle.join()
    }
}

impl Drop for TaskThread {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run_tasks(receiver: Receiver<Message>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(task) => task(),
            Message::Quit => break,
        }
    }
}
