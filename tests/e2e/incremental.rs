use crate::e2e::*;

const CHAIN: &str = "
final: mid
\tcat mid > final
\techo built final >> log
mid: in
\tcat in > mid
\techo built mid >> log
";

#[test]
fn modified_input_rebuilds_chain() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", CHAIN)?;
    space.write("in", "v1")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "[1/2] mid");
    assert_output_contains(&out, "[2/2] final");
    assert_eq!(space.read_string("final")?, "v1");

    space.modify("in", "v2")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read_string("final")?, "v2");

    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn touch_without_change_is_not_a_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", CHAIN)?;
    space.write("in", "same")?;
    space.run_expect(&mut mason_command(vec![]))?;

    space.modify("in", "same")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn timestamps_flag_rebuilds_on_touch() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: in\n\tcat in > out\n")?;
    space.write("in", "same")?;
    space.run_expect(&mut mason_command(vec!["--timestamps"]))?;

    space.modify("in", "same")?;
    let out = space.run_expect(&mut mason_command(vec!["--timestamps"]))?;
    assert_output_contains(&out, "ran 1 tasks");

    let out = space.run_expect(&mut mason_command(vec!["--timestamps"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn unchanged_intermediate_stops_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "
final: mid
\tcat mid > final
\techo built final >> log
mid: in
\thead -c 2 in > mid
\techo built mid >> log
",
    )?;
    space.write("in", "abc")?;
    space.run_expect(&mut mason_command(vec![]))?;

    // mid's content won't change, so final needn't run.
    space.modify("in", "abd")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");
    assert_eq!(
        space.read_string("log")?,
        "built mid\nbuilt final\nbuilt mid\n"
    );
    Ok(())
}

#[test]
fn deleted_output_is_rebuilt() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", CHAIN)?;
    space.write("in", "v1")?;
    space.run_expect(&mut mason_command(vec![]))?;

    std::fs::remove_file(space.path().join("final"))?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");
    assert_eq!(space.read_string("final")?, "v1");
    Ok(())
}

#[test]
fn changed_recipe_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: in\n\tcat in > out\n")?;
    space.write("in", "x")?;
    space.run_expect(&mut mason_command(vec![]))?;

    space.write("Makefile", "out: in\n\tcat in in > out\n")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");
    assert_eq!(space.read_string("out")?, "xx");
    Ok(())
}

#[test]
fn always_make() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", CHAIN)?;
    space.write("in", "v1")?;
    space.run_expect(&mut mason_command(vec![]))?;

    let out = space.run_expect(&mut mason_command(vec!["-B"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    Ok(())
}

#[test]
fn included_headers_are_tracked() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    std::fs::create_dir(space.path().join("include"))?;
    space.write(
        "Makefile",
        "
CPPPATH = include
main.o: main.c
\tcat $^ > $@
",
    )?;
    space.write(
        "main.c",
        "#include \"util.h\"\n#include <api.h>\n#include <stdio.h>\nint main;\n",
    )?;
    space.write("util.h", "#include \"util_impl.h\"\n")?;
    space.write("util_impl.h", "// impl\n")?;
    space.write("include/api.h", "// api\n")?;
    space.run_expect(&mut mason_command(vec![]))?;

    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "no work to do");

    // Reached only through util.h.
    space.modify("util_impl.h", "// impl v2\n")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");

    space.modify("include/api.h", "// api v2\n")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");

    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn parallel_jobs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut makefile = String::from("all:");
    for i in 0..8 {
        makefile.push_str(&format!(" out{}", i));
    }
    makefile.push('\n');
    for i in 0..8 {
        makefile.push_str(&format!("out{}:\n\techo {} > $@\n", i, i));
    }
    space.write("Makefile", &makefile)?;
    for jobs in ["0", "3"] {
        let out = space.run_expect(&mut mason_command(vec!["-B", "-j", jobs]))?;
        assert_output_contains(&out, "ran 8 tasks");
    }
    assert_eq!(space.read_string("out7")?, "7\n");
    Ok(())
}
