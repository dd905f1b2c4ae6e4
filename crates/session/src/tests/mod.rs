mod peer_tests;
mod registry_tests;
