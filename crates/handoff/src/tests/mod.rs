//! Cross-module tests driving full schedule -> dispatch -> respond -> drain
//! flows over real work threads.

mod teardown;
