use std::fs;
use std::process::Command;

use tempfile::tempdir;

const HEADER: &str = "##fileformat=VCFv4.2\n\
##contig=<ID=20,assembly=b37,length=64444167>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT";

#[test]
fn cli_merges_files_and_writes_matrices() {
    let tmp = tempdir().expect("temporary directory");
    let first = tmp.path().join("first.vcf");
    let second = tmp.path().join("second.vcf");
    let merged = tmp.path().join("merged.vcf");
    let haplotypes = tmp.path().join("haplotypes.tsv");

    fs::write(
        &first,
        format!(
            "{HEADER}\tNA001\n\
20\t14370\trs6054257\tG\tA\t29\tPASS\t.\tGT:GL\t0|1:-0.1,-1,-3\n\
20\t17330\t.\tT\tA\t3\tq10\t.\tGT:GL\t0|0:0,-2,-5\n"
        ),
    )
    .expect("write first input");
    fs::write(
        &second,
        format!(
            "{HEADER}\tNA002\n\
20\t14370\trs6054257\tG\tA\t29\tPASS\t.\tGT:GL\t1|1:-3,-1,0\n"
        ),
    )
    .expect("write second input");

    let exe = env!("CARGO_BIN_EXE_vcfmerge");
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            first.to_str().expect("path str"),
            second.to_str().expect("path str"),
            "--output",
            merged.to_str().expect("path str"),
            "--haplotypes-matrix",
            haplotypes.to_str().expect("path str"),
        ])
        .status()
        .expect("run vcfmerge cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let text = fs::read_to_string(&merged).expect("merged output");
    let rows: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("20\t14370\trs6054257\tG\tA\t29\tPASS\t.\tGT:GL\t0|1:"));
    assert!(rows[1].ends_with("\t./.:."));
    assert!(text.contains("\tFORMAT\tNA001\tNA002\n"));

    let matrix = fs::read_to_string(&haplotypes).expect("haplotype matrix");
    assert_eq!(matrix, "0\t0\t1\t1\t1\n1\t0\t0\t-1\t-1\n");
}

#[test]
fn cli_honours_flags_over_defaults() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("input.vcf");
    let merged = tmp.path().join("merged.vcf");
    fs::write(
        &input,
        format!("{HEADER}\tNA001\n20\t10\t.\tACGTACGT\tA\t.\tPASS\t.\tGT:GL\t0|1:0,-1,-2\n"),
    )
    .expect("write input");

    let exe = env!("CARGO_BIN_EXE_vcfmerge");
    let status = Command::new(exe)
        .args([
            input.to_str().expect("path str"),
            "--output",
            merged.to_str().expect("path str"),
            "--no-geno-probs",
            "--max-allele-len",
            "4",
        ])
        .status()
        .expect("run vcfmerge cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let text = fs::read_to_string(&merged).expect("merged output");
    let row = text
        .lines()
        .find(|l| !l.starts_with('#'))
        .expect("data row");
    assert_eq!(row, "20\t10\t.\tACGT\tA\t.\tPASS\t.\tGT\t0|1");
}

#[test]
fn cli_fails_on_positions_past_the_contig_end() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("input.vcf");
    fs::write(
        &input,
        format!("{HEADER}\tNA001\n20\t64444168\t.\tG\tA\t.\tPASS\t.\tGT\t0|1\n"),
    )
    .expect("write input");

    let output = Command::new(env!("CARGO_BIN_EXE_vcfmerge"))
        .arg(&input)
        .output()
        .expect("run vcfmerge cli");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Fatal:"), "stderr was: {stderr}");
    assert!(stderr.contains("64444168"), "stderr was: {stderr}");
}
