//! The lock guarding every shared table: a spinning ticket lock, so waiters
//! are served in arrival order and a fault cannot starve behind others.

pub type Mutex<T> = spin::mutex::TicketMutex<T>;
pub type MutexGuard<'a, T> = spin::mutex::TicketMutexGuard<'a, T>;
