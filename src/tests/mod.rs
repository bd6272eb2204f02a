// Cross-module tests driving whole sessions over the in-process transport.
// Unit tests for individual modules live next to the code they cover.

mod session_tests;
