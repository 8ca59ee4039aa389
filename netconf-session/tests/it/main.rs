mod mock;
mod notifications;
mod session;
