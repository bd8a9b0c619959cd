mod distributed;
mod local_core;
