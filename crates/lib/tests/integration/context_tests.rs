use std::fs;

use buildguard_lib::consts::FULL_BUILD_ENV;
use buildguard_lib::{BuildContextManager, BuildError, PathSet, PathSetKind};
use serde_json::json;
use serial_test::serial;
use tracing_test::traced_test;

use super::common::{BUILDER_ID, TestEnv, age, sorted, write};

#[test]
fn output_directory_is_resolved() {
  let env = TestEnv::new();
  let ctx = env.context_for(&env.output_dir.join("nested").join(".."), BUILDER_ID);
  assert_eq!(ctx.output_directory(), env.output_dir);
}

#[test]
fn set_configuration_signals_change() {
  let env = TestEnv::new();
  let paths = PathSet::new(&env.input_dir);

  for (digest, changed) in [(1u8, true), (1, false), (2, true), (2, false)] {
    let ctx = env.context();
    assert_eq!(ctx.set_configuration(&paths, vec![digest]).unwrap(), changed);
    ctx.commit().unwrap();
  }
}

#[test]
fn set_configuration_considers_builder_id() {
  let env = TestEnv::new();
  let paths = PathSet::new(&env.input_dir);

  let ctx = env.context_for(&env.output_dir, "test-plugin:1");
  assert!(ctx.set_configuration(&paths, vec![1]).unwrap());
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context_for(&env.output_dir, "test-plugin:2");
  assert!(ctx.set_configuration(&paths, vec![1]).unwrap());
  ctx.commit().unwrap();
}

#[test]
fn set_configuration_considers_path_set() {
  let env = TestEnv::new();
  let all = PathSet::new(&env.input_dir);
  let java = PathSet::new(&env.input_dir).with_includes(["*.java"]);

  let ctx = env.context();
  assert!(ctx.set_configuration(&all, vec![1]).unwrap());
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert!(ctx.set_configuration(&java, vec![1]).unwrap());
  assert!(!ctx.set_configuration(&all, vec![1]).unwrap());
  assert!(!ctx.set_configuration(&java, vec![1]).unwrap());
  ctx.commit().unwrap();
}

#[test]
#[traced_test]
fn corrupt_state_file_is_tolerated() {
  let env = TestEnv::new();
  let paths = PathSet::new(&env.input_dir);

  let ctx = env.context();
  assert!(ctx.set_configuration(&paths, vec![1]).unwrap());
  ctx.commit().unwrap();
  drop(ctx);

  assert!(env.state_file().is_file());
  fs::write(env.state_file(), b"").unwrap();

  let ctx = env.context();
  assert!(ctx.set_configuration(&paths, vec![1]).unwrap());
  ctx.commit().unwrap();
  assert!(logs_contain("could not read build state"));
}

#[test]
fn unchanged_inputs_are_skipped() {
  let env = TestEnv::new();
  env.write_input("input.java", "class A {}");
  let paths = env.inputs().with_kind(PathSetKind::FilesAndDirectories);

  let ctx = env.context();
  assert_eq!(sorted(ctx.get_inputs(&paths, false).unwrap()), ["", "input.java"]);
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert!(ctx.get_inputs(&paths, false).unwrap().is_empty());
  assert_eq!(sorted(ctx.get_inputs(&paths, true).unwrap()), ["", "input.java"]);
  ctx.commit().unwrap();
}

#[test]
fn modified_inputs_are_returned() {
  let env = TestEnv::new();
  let input = env.write_input("input.java", "class A {}");
  let output = env.write_output("input.class", "bytes");
  let paths = env.inputs();

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
  ctx.add_output(&input, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert!(ctx.get_inputs(&paths, false).unwrap().is_empty());
  ctx.commit().unwrap();
  drop(ctx);

  age(&input, 60);
  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
  ctx.add_output(&input, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  write(&input, "class A { int x; }");
  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
  ctx.commit().unwrap();
}

#[test]
fn inputs_with_deleted_outputs_are_returned() {
  let env = TestEnv::new();
  let input = env.write_input("input.java", "class A {}");
  let output = env.write_output("input.class", "bytes");
  let paths = env.inputs();

  let ctx = env.context();
  ctx.get_inputs(&paths, false).unwrap();
  ctx.add_output(&input, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  fs::remove_file(&output).unwrap();

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
  ctx.commit().unwrap();
}

#[test]
fn default_excludes_are_never_returned() {
  let env = TestEnv::new();
  env.write_input("A.java", "");
  env.write_input(".git/config", "");
  env.write_input("CVS/Entries", "");
  env.write_input("B.java~", "");
  env.write_input("sub/.DS_Store", "");

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&env.inputs(), false).unwrap(), ["A.java"]);
  ctx.commit().unwrap();
}

#[test]
fn obsolete_outputs_are_deleted() {
  let env = TestEnv::new();
  let input = env.input("src/input.java");
  let output1 = env.write_output("output.class", "");
  let output2 = env.write_output("output$inner.class", "");
  let output3 = env.output("new.class");

  let ctx = env.context();
  ctx.add_outputs(&input, [&output1, &output2]).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  ctx.add_output(&input, &output1).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  assert!(output1.is_file());
  assert!(!output2.exists());
  assert!(env.listener.take().contains(&output2));

  write(&output3, "");
  let ctx = env.context();
  ctx.add_output(&input, "new.class").unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  assert!(output3.is_file());
  assert!(!output1.exists());
}

#[test]
fn outputs_claimed_by_another_input_survive() {
  let env = TestEnv::new();
  let input1 = env.write_input("input1.java", "");
  let input2 = env.write_input("input2.java", "");
  let output = env.write_output("shared.class", "");
  let paths = env.inputs();

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap().len(), 2);
  ctx.add_output(&input1, &output).unwrap();
  ctx.add_output(&input2, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, true).unwrap().len(), 2);
  ctx.add_output(&input2, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);
  assert!(output.is_file());

  let ctx = env.context();
  ctx.get_inputs(&paths, true).unwrap();
  ctx.commit().unwrap();
  drop(ctx);
  assert!(!output.exists());
}

#[test]
fn outputs_of_deleted_inputs_are_deleted() {
  let env = TestEnv::new();
  let input = env.write_input("input.java", "");
  let output = env.write_output("input.class", "");
  let paths = env.inputs();

  let ctx = env.context();
  ctx.get_inputs(&paths, false).unwrap();
  ctx.add_output(&input, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);
  env.listener.take();

  fs::remove_file(&input).unwrap();
  let ctx = env.context();
  assert!(ctx.get_inputs(&paths, false).unwrap().is_empty());
  ctx.commit().unwrap();
  drop(ctx);

  assert!(!output.exists());
  assert_eq!(env.listener.take(), [output]);

  // Forgotten entirely: recreating the input makes it new again.
  write(&input, "");
  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
  ctx.commit().unwrap();
}

#[test]
fn directory_input_survives_a_files_only_path_set() {
  let env = TestEnv::new();
  env.write_input("sub/a.txt", "");
  env.write_input("top.txt", "");
  let dir_input = env.input("sub");
  let output = env.write_output("sub.idx", "index");
  let dirs = PathSet::new(&env.input_dir)
    .with_kind(PathSetKind::DirectoriesOnly)
    .with_includes(["sub"]);
  let files = env.inputs();

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&dirs, false).unwrap(), ["sub"]);
  ctx.add_output(&dir_input, &output).unwrap();
  assert_eq!(sorted(ctx.get_inputs(&files, false).unwrap()), ["sub/a.txt", "top.txt"]);
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert!(ctx.get_inputs(&dirs, false).unwrap().is_empty());
  assert!(ctx.get_inputs(&files, false).unwrap().is_empty());
  ctx.commit().unwrap();
  drop(ctx);
  assert!(output.is_file());

  fs::remove_dir_all(&dir_input).unwrap();
  let ctx = env.context();
  assert!(ctx.get_inputs(&dirs, false).unwrap().is_empty());
  ctx.commit().unwrap();
  drop(ctx);
  assert!(!output.exists());
}

#[test]
fn output_directories_of_deleted_inputs_are_deleted() {
  let env = TestEnv::new();
  let input1 = env.input("input");
  let input2 = env.input("input/subdir");
  fs::create_dir_all(&input2).unwrap();
  let output1 = env.output("output");
  let output2 = env.output("output/subdir");
  let paths = env.inputs().with_kind(PathSetKind::FilesAndDirectories);

  let ctx = env.context();
  assert_eq!(
    sorted(ctx.get_inputs(&paths, false).unwrap()),
    ["", "input", "input/subdir"]
  );
  fs::create_dir_all(&output2).unwrap();
  ctx.add_output(&input1, &output1).unwrap();
  ctx.add_output(&input2, &output2).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  fs::remove_dir(&input2).unwrap();
  fs::remove_dir(&input1).unwrap();

  let ctx = env.context();
  assert!(ctx.get_inputs(&paths, false).unwrap().is_empty());
  ctx.commit().unwrap();
  drop(ctx);

  assert!(!output2.exists());
  assert!(!output1.exists());
}

#[test]
fn outputs_of_excluded_inputs_are_kept() {
  let env = TestEnv::new();
  let input = env.write_input("input.java", "");
  let output = env.write_output("output.class", "");

  let ctx = env.context();
  ctx.get_inputs(&env.inputs(), false).unwrap();
  ctx.add_output(&input, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  let paths = env.inputs().with_excludes(["*.java"]);
  assert!(ctx.get_inputs(&paths, false).unwrap().is_empty());
  ctx.commit().unwrap();
  drop(ctx);

  assert!(output.is_file());
}

#[test]
fn renamed_input_replaces_its_output() {
  let env = TestEnv::new();
  let input1 = env.write_input("input1.java", "");
  let input2 = env.input("dir/input2.java");
  let output1 = env.write_output("output1.class", "");
  let output2 = env.output("dir/output2.class");
  let paths = env.inputs();

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input1.java"]);
  ctx.add_output(&input1, &output1).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  fs::create_dir_all(input2.parent().unwrap()).unwrap();
  fs::rename(&input1, &input2).unwrap();

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["dir/input2.java"]);
  write(&output2, "");
  ctx.add_output(&input2, &output2).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  assert!(!output1.exists());
  assert!(output2.is_file());

  fs::rename(&input2, &input1).unwrap();
  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input1.java"]);
  ctx.commit().unwrap();
}

#[test]
fn changed_referenced_inputs_trigger_processing() {
  let env = TestEnv::new();
  let input = env.write_input("input.g", "");
  let referenced = env.write_input("referenced.g", "");
  let output = env.write_output("output.java", "");
  let paths = PathSet::from_file(&input);

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.g"]);
  ctx.add_referenced_inputs(&input, [&referenced]).unwrap();
  ctx.add_output(&input, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert!(ctx.get_inputs(&paths, false).unwrap().is_empty());
  ctx.commit().unwrap();
  drop(ctx);

  write(&referenced, " ");
  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.g"]);
  ctx.add_referenced_inputs(&input, [&referenced]).unwrap();
  ctx.add_output(&input, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  fs::remove_file(&referenced).unwrap();
  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.g"]);
  ctx.commit().unwrap();
}

#[test]
fn commit_twice_is_harmless() {
  let env = TestEnv::new();
  let ctx = env.context();
  ctx.commit().unwrap();
  ctx.commit().unwrap();
}

#[test]
fn commit_after_close_is_invalid() {
  let env = TestEnv::new();
  let ctx = env.context();
  ctx.close();
  let err = ctx.commit().unwrap_err();
  assert!(matches!(err, BuildError::Closed));
  assert!(err.is_illegal_state());
}

#[test]
fn mutations_after_commit_are_invalid() {
  let env = TestEnv::new();
  let input = env.input("input.java");
  let ctx = env.context();
  ctx.commit().unwrap();

  assert!(matches!(ctx.add_output(&input, "out.class"), Err(BuildError::Committed)));
  assert!(matches!(ctx.get_inputs(&env.inputs(), false), Err(BuildError::Committed)));
  assert!(matches!(ctx.new_output_stream("out.class"), Err(BuildError::Committed)));
  assert!(matches!(ctx.clear_messages(&input), Err(BuildError::Committed)));
  assert!(matches!(
    ctx.set_configuration(&env.inputs(), vec![1]),
    Err(BuildError::Committed)
  ));

  ctx.close();
  assert!(matches!(ctx.set_value("k", None), Err(BuildError::Closed)));
}

#[test]
fn close_without_commit_wipes_build_state() {
  let env = TestEnv::new();
  let input = env.write_input("input.java", "");
  let output = env.write_output("input.class", "");
  let paths = env.inputs();

  let ctx = env.context();
  ctx.get_inputs(&paths, false).unwrap();
  ctx.add_output(&input, &output).unwrap();
  ctx.commit().unwrap();
  drop(ctx);
  assert!(env.state_file().is_file());

  let ctx = env.context();
  assert!(ctx.get_inputs(&paths, false).unwrap().is_empty());
  ctx.close();
  assert!(!env.state_file().exists());

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
  ctx.commit().unwrap();
}

#[test]
fn dropping_an_open_context_discards_state() {
  let env = TestEnv::new();
  env.write_input("input.java", "");
  let paths = env.inputs();

  let ctx = env.context();
  ctx.get_inputs(&paths, false).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  {
    let _aborted = env.context();
  }

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
}

#[test]
fn values_persist_between_builds() {
  let env = TestEnv::new();

  let ctx = env.context();
  assert_eq!(ctx.value("generated"), None);
  ctx.set_value("generated", Some(json!(["A.java", "B.java"]))).unwrap();
  assert_eq!(ctx.value("generated"), Some(json!(["A.java", "B.java"])));
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert_eq!(ctx.value("generated"), Some(json!(["A.java", "B.java"])));
  ctx.set_value("generated", None).unwrap();
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert_eq!(ctx.value("generated"), None);
}

#[test]
fn output_sets_register_every_selected_entry() {
  let env = TestEnv::new();
  let input = env.write_input("schema.xsd", "");
  let a = env.write_output("gen/A.java", "");
  let b = env.write_output("gen/pkg/B.java", "");
  env.write_output("gen/notes.txt", "");
  let paths = env.inputs();

  let ctx = env.context();
  ctx.get_inputs(&paths, false).unwrap();
  let outputs = PathSet::new(env.output("gen")).with_includes(["**/*.java"]);
  assert_eq!(sorted(ctx.add_output_set(&input, &outputs).unwrap()), [a.clone(), b.clone()]);
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert_eq!(ctx.get_inputs(&paths, true).unwrap(), ["schema.xsd"]);
  ctx.commit().unwrap();
  drop(ctx);

  assert!(!a.exists());
  assert!(!b.exists());
  assert!(env.output("gen/notes.txt").exists());
}

#[test]
fn listener_sees_registered_and_deleted_outputs() {
  let env = TestEnv::new();
  let input = env.write_input("input.java", "");
  let output1 = env.write_output("a.class", "");
  let output2 = env.write_output("b.class", "");

  let ctx = env.context();
  ctx.get_inputs(&env.inputs(), false).unwrap();
  ctx.add_outputs(&input, [&output1, &output2]).unwrap();
  ctx.commit().unwrap();
  drop(ctx);
  assert_eq!(sorted(env.listener.take()), [output1.clone(), output2.clone()]);

  let ctx = env.context();
  ctx.get_inputs(&env.inputs(), true).unwrap();
  ctx.add_output(&input, &output1).unwrap();
  ctx.commit().unwrap();
  drop(ctx);
  assert_eq!(sorted(env.listener.take()), [output1, output2]);
}

#[test]
fn full_build_policy_ignores_previous_state() {
  let env = TestEnv::with_policy(|_, _, builder_id| builder_id == "always-full");
  env.write_input("input.java", "");
  let paths = env.inputs();

  let ctx = env.context_for(&env.output_dir, "always-full");
  assert!(ctx.is_full_build());
  assert!(ctx.set_configuration(&paths, vec![1]).unwrap());
  ctx.set_value("k", Some(json!(1))).unwrap();
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context_for(&env.output_dir, "always-full");
  assert!(ctx.set_configuration(&paths, vec![1]).unwrap());
  assert_eq!(ctx.value("k"), None);
  assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
  ctx.commit().unwrap();
  drop(ctx);

  let ctx = env.context();
  assert!(!ctx.is_full_build());
}

#[test]
#[serial]
fn full_build_can_be_forced_from_environment() {
  let temp = tempfile::TempDir::new().unwrap();
  let input_dir = temp.path().join("in");
  write(&input_dir.join("input.java"), "");
  let paths = PathSet::new(&input_dir);
  let manager = BuildContextManager::new();

  temp_env::with_var(FULL_BUILD_ENV, None::<&str>, || {
    let ctx = manager.new_context(temp.path().join("out"), temp.path().join("state"), BUILDER_ID).unwrap();
    assert!(!ctx.is_full_build());
    assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
    ctx.commit().unwrap();
  });

  temp_env::with_var(FULL_BUILD_ENV, Some("true"), || {
    let ctx = manager.new_context(temp.path().join("out"), temp.path().join("state"), BUILDER_ID).unwrap();
    assert!(ctx.is_full_build());
    assert_eq!(ctx.get_inputs(&paths, false).unwrap(), ["input.java"]);
    ctx.commit().unwrap();
  });
}
