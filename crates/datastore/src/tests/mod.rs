mod helpers;

mod merge_tests;
